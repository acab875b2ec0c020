/// Server management module for the upload supervisor.
///
/// This module selects, installs, launches and watches the bundled upload
/// server binary. All public components are instrumented with `tracing` spans.
///
/// # Components
///
/// * `arch` - Maps the host's ABI list to one of the bundled binary variants
/// * `install` - Asset store abstraction and the install-if-outdated copy
/// * `output` - Drains server output and detects the readiness line
/// * `process` - A single spawned server process and its exit monitor
/// * `network` - Local-network IPv4 discovery
/// * `supervisor` - The supervisor task and its handle
/// * `lifecycle` - Bounded history of lifecycle events
/// * `monitor` - Automatic restart after failures
///
/// # Examples
///
/// Starting the server with a callback:
///
/// ```no_run
/// use upload_supervisor::config::SupervisorConfig;
/// use upload_supervisor::error::Error;
/// use upload_supervisor::server::{ServerCallback, Supervisor};
///
/// struct Printer;
///
/// impl ServerCallback for Printer {
///     fn started(&self, ip: &str, port: u16) {
///         println!("Open http://{}:{} on your phone", ip, port);
///     }
///
///     fn failed(&self, error: &Error) {
///         eprintln!("Server failed: {}", error);
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> upload_supervisor::Result<()> {
///     let supervisor = Supervisor::with_dir_assets(
///         SupervisorConfig::new("/data/files", "/data/assets"),
///     )?;
///     supervisor.start(Printer).await?;
///     Ok(())
/// }
/// ```
///
/// Keeping the server up:
///
/// ```no_run
/// use upload_supervisor::config::SupervisorConfig;
/// use upload_supervisor::server::{RestartMonitor, RestartMonitorConfig, Supervisor};
///
/// # async fn run() -> upload_supervisor::Result<()> {
/// let config = SupervisorConfig::new("/data/files", "/data/assets");
/// let monitor_config = RestartMonitorConfig::from(&config);
/// let supervisor = Supervisor::with_dir_assets(config)?;
///
/// let mut monitor = RestartMonitor::new(supervisor.clone(), monitor_config);
/// monitor.start()?;
/// # Ok(())
/// # }
/// ```
pub mod arch;
pub mod install;
pub mod lifecycle;
pub mod monitor;
pub mod network;
pub mod output;
mod process;
mod supervisor;

pub use arch::{Architecture, host_abis};
pub use install::{AssetStore, DirAssetStore, InstallOutcome, ensure_installed};
pub use lifecycle::{LifecycleEvent, LifecycleLog, LifecycleRecord};
pub use monitor::{RestartMonitor, RestartMonitorConfig};
pub use network::local_ipv4;
pub use process::{ExitInfo, LaunchSpec, ServerId, ServerProcess, ServerStatus};
pub use supervisor::{
    ChannelCallback, Endpoint, LoggingCallback, ServerCallback, StartOutcome, Supervisor,
    SupervisorEvent,
};
