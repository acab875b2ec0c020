/*!
 # Upload Supervisor

 A Rust library for running the bundled upload server of a video receiver.

 ## Overview

 Upload Supervisor provides functionality to:
 - Pick the prebuilt server binary matching the host CPU
 - Install it to a writable location and mark it executable
 - Launch it against the upload directory and watch its output
 - Detect the readiness line and the port the server bound
 - Stop, restart, and automatically retry after failures

 ## Basic Usage

 ```no_run
 use upload_supervisor::{Receiver, Result};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a receiver from config file
     let mut receiver = Receiver::from_config_file("receiver.json")?;

     // Start the server and keep it running
     let endpoint = receiver.run().await?;
     println!("Upload videos at http://{}:{}", endpoint.ip, endpoint.port);

     // Finished uploads land here
     println!("Watching {}", receiver.upload_path().display());

     receiver.shutdown().await?;
     Ok(())
 }
 ```

 ## Features

 - **Architecture Selection**: arm64, arm32, x64 and x86 hosts
 - **Install If Outdated**: the bundled binary is only copied when needed
 - **Readiness Detection**: waits for `Server starting at ...:<port>`
 - **Supervision**: one task owns the process; exits are pushed, not polled
 - **Automatic Retry**: failures are retried after a fixed delay, forever
 - **Configuration**: JSON or YAML files
*/

pub mod config;
pub mod error;
pub mod server;

pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use server::{Endpoint, ServerCallback, ServerStatus, Supervisor, SupervisorEvent};

use server::{AssetStore, RestartMonitor, RestartMonitorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs the upload server for a receiver
///
/// This struct is the main entry point: it owns the supervisor and the
/// restart monitor that keeps the server up.
/// All public methods are instrumented with `tracing` spans.
pub struct Receiver {
    /// Configuration
    config: SupervisorConfig,
    /// Supervisor handle
    supervisor: Supervisor,
    /// Automatic restart monitor (if running)
    monitor: Option<RestartMonitor>,
}

impl Receiver {
    /// Create a new receiver from a configuration file path
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = SupervisorConfig::from_file(path)?;
        Self::new(config)
    }

    /// Create a new receiver from a JSON configuration string
    #[tracing::instrument(skip(config))]
    pub fn from_config_str(config: &str) -> Result<Self> {
        tracing::info!("Loading configuration from string");
        let config = SupervisorConfig::parse_from_str(config)?;
        Self::new(config)
    }

    /// Create a new receiver whose binaries come from `config.asset_dir`
    #[tracing::instrument(skip(config), fields(storage_dir = %config.storage_dir.display()))]
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        tracing::info!("Creating new Receiver");
        let supervisor = Supervisor::with_dir_assets(config.clone())?;
        Ok(Self {
            config,
            supervisor,
            monitor: None,
        })
    }

    /// Create a new receiver with a custom asset store
    pub fn with_asset_store(config: SupervisorConfig, store: Arc<dyn AssetStore>) -> Result<Self> {
        let supervisor = Supervisor::new(config.clone(), store)?;
        Ok(Self {
            config,
            supervisor,
            monitor: None,
        })
    }

    /// Start the server and the restart monitor
    ///
    /// Returns the outcome of the first start attempt. When it fails, the
    /// monitor is already running and keeps retrying in the background.
    #[tracing::instrument(skip(self))]
    pub async fn run(&mut self) -> Result<Endpoint> {
        if self.monitor.is_none() {
            let mut monitor = RestartMonitor::new(
                self.supervisor.clone(),
                RestartMonitorConfig::from(&self.config),
            );
            monitor.start()?;
            self.monitor = Some(monitor);
            tracing::debug!("Restart monitor started");
        }

        match self.supervisor.start_and_wait().await {
            Ok(endpoint) => {
                tracing::info!(ip = %endpoint.ip, port = endpoint.port, "Receiver ready");
                Ok(endpoint)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in = ?self.config.retry_delay(),
                    "First start failed, retrying in background"
                );
                Err(e)
            }
        }
    }

    /// Restart the server if it is not running
    ///
    /// Meant for hosts coming back to the foreground, where a missed exit
    /// would otherwise go unnoticed.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_running(&self) -> Result<Endpoint> {
        if self.supervisor.is_running().await? {
            tracing::debug!("Server already running");
        } else {
            tracing::info!("Server not running, starting it");
        }
        self.supervisor.start_and_wait().await
    }

    /// Stop the restart monitor and the server
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down receiver");
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop()?;
        }
        self.supervisor.shutdown().await
    }

    /// Supervisor handle
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Configuration
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Restarts issued by the monitor so far
    pub fn restart_count(&self) -> u64 {
        self.monitor
            .as_ref()
            .map(|monitor| monitor.restart_count())
            .unwrap_or(0)
    }

    /// Path of the finished upload the server writes
    pub fn upload_path(&self) -> PathBuf {
        self.config.upload_path()
    }
}
