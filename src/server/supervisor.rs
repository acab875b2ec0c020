//! The process supervisor.
//!
//! A single task owns the server process and every piece of mutable state
//! around it. [`Supervisor`] handles talk to that task over a command channel
//! and observe it through a status watch and a broadcast of
//! [`SupervisorEvent`]s, so concurrent `start`/`stop` calls are serialised
//! without shared locks.

use crate::config::{SupervisorConfig, validate_config};
use crate::error::{Error, FailureKind, Result};
use crate::server::arch::{Architecture, host_abis};
use crate::server::install::{AssetStore, DirAssetStore, ensure_installed};
use crate::server::lifecycle::{LifecycleEvent, LifecycleLog};
use crate::server::network::local_ipv4;
use crate::server::output::Readiness;
use crate::server::process::{ExitInfo, LaunchSpec, ServerId, ServerProcess, ServerStatus, wait_exit};
use futures::Stream;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

/// Broadcast channel capacity for supervisor events
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Command queue depth
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Receives the outcome of one `start` call.
///
/// Methods are called from the supervisor task, never from the caller of
/// `start`, and must not block. Exactly one of `started` or `failed` is
/// called per `start`.
pub trait ServerCallback: Send + Sync + 'static {
    /// The server is up and reachable at `ip:port`
    fn started(&self, ip: &str, port: u16);

    /// The start attempt failed
    fn failed(&self, error: &Error);

    /// The architecture was resolved, before installation begins
    fn architecture_detected(&self, _architecture: Architecture) {}
}

/// Callback that only logs the outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallback;

impl ServerCallback for LoggingCallback {
    fn started(&self, ip: &str, port: u16) {
        tracing::info!(%ip, port, "Server running");
    }

    fn failed(&self, error: &Error) {
        tracing::warn!(error = %error, kind = ?error.kind(), "Server failed to start");
    }
}

/// Outcome of a `start` call as delivered by [`ChannelCallback`]
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// Architecture resolved
    ArchitectureDetected(Architecture),
    /// Server is up
    Started(Endpoint),
    /// Start failed
    Failed(Error),
}

/// Callback that forwards outcomes to a channel
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<StartOutcome>,
}

impl ChannelCallback {
    /// Create a callback and the receiver its outcomes arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StartOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ServerCallback for ChannelCallback {
    fn started(&self, ip: &str, port: u16) {
        let _ = self.tx.send(StartOutcome::Started(Endpoint {
            ip: ip.to_string(),
            port,
        }));
    }

    fn failed(&self, error: &Error) {
        let _ = self.tx.send(StartOutcome::Failed(error.clone()));
    }

    fn architecture_detected(&self, architecture: Architecture) {
        let _ = self.tx.send(StartOutcome::ArchitectureDetected(architecture));
    }
}

struct OneshotCallback(Mutex<Option<oneshot::Sender<Result<Endpoint>>>>);

impl OneshotCallback {
    fn complete(&self, outcome: Result<Endpoint>) {
        if let Ok(mut slot) = self.0.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(outcome);
            }
        }
    }
}

impl ServerCallback for OneshotCallback {
    fn started(&self, ip: &str, port: u16) {
        self.complete(Ok(Endpoint {
            ip: ip.to_string(),
            port,
        }));
    }

    fn failed(&self, error: &Error) {
        self.complete(Err(error.clone()));
    }
}

/// Address the upload server can be reached at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Local-network IPv4 address, or `unknown`
    pub ip: String,
    /// Bound port
    pub port: u16,
}

/// Events published by the supervisor task
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SupervisorEvent {
    /// Architecture resolved for a start attempt
    ArchitectureDetected { architecture: Architecture },
    /// Binary installed (or found up to date)
    Installed { path: PathBuf, copied: bool },
    /// Server is up
    Started {
        server_id: ServerId,
        pid: u32,
        architecture: Architecture,
        ip: String,
        port: u16,
    },
    /// A start attempt failed
    Failed { kind: FailureKind, message: String },
    /// A running server exited on its own
    Exited { server_id: ServerId, exit: ExitInfo },
    /// The server was stopped on request
    Stopped { server_id: Option<ServerId> },
}

enum Command {
    Start {
        callback: Arc<dyn ServerCallback>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    IsRunning {
        reply: oneshot::Sender<bool>,
    },
    Endpoint {
        reply: oneshot::Sender<Option<Endpoint>>,
    },
    ExitWatch {
        reply: oneshot::Sender<Option<watch::Receiver<Option<ExitInfo>>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    StartFinished {
        attempt: u64,
        outcome: Result<(ServerProcess, Endpoint)>,
    },
    Exited {
        server_id: ServerId,
        exit: ExitInfo,
    },
}

/// Handle to the supervisor task.
///
/// Handles are cheap to clone. The task, and the server with it, shuts down
/// when the last handle is dropped or [`Supervisor::shutdown`] is called.
///
/// # Example
///
/// ```no_run
/// use upload_supervisor::config::SupervisorConfig;
/// use upload_supervisor::server::Supervisor;
///
/// #[tokio::main]
/// async fn main() -> upload_supervisor::Result<()> {
///     let config = SupervisorConfig::new("/data/files", "/data/assets");
///     let supervisor = Supervisor::with_dir_assets(config)?;
///
///     let endpoint = supervisor.start_and_wait().await?;
///     println!("Upload at http://{}:{}", endpoint.ip, endpoint.port);
///
///     supervisor.stop().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ServerStatus>,
    events: broadcast::Sender<SupervisorEvent>,
    lifecycle: LifecycleLog,
    config: Arc<SupervisorConfig>,
}

impl Supervisor {
    /// Create a supervisor using the given asset store.
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(skip_all, fields(storage_dir = %config.storage_dir.display()))]
    pub fn new(config: SupervisorConfig, store: Arc<dyn AssetStore>) -> Result<Self> {
        validate_config(&config)?;

        let abis = config.supported_abis.clone().unwrap_or_else(host_abis);
        tracing::debug!(?abis, "Supported ABIs");

        let config = Arc::new(config);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ServerStatus::NotStarted);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let lifecycle = LifecycleLog::new();

        let task = SupervisorTask {
            context: Arc::new(StartContext {
                config: Arc::clone(&config),
                store,
                abis,
                events: events_tx.clone(),
            }),
            commands: command_rx,
            internal_tx,
            internal_rx,
            status: status_tx,
            events: events_tx.clone(),
            lifecycle: lifecycle.clone(),
            current: None,
            in_flight: None,
            attempts: 0,
        };
        tokio::spawn(task.run());

        Ok(Self {
            commands: command_tx,
            status: status_rx,
            events: events_tx,
            lifecycle,
            config,
        })
    }

    /// Create a supervisor whose assets live in `config.asset_dir`
    pub fn with_dir_assets(config: SupervisorConfig) -> Result<Self> {
        let store = Arc::new(DirAssetStore::new(config.asset_dir.clone()));
        Self::new(config, store)
    }

    /// Starts the server, or reports the running one, through `callback`.
    ///
    /// Returns once the request is queued; the outcome arrives on the callback.
    #[tracing::instrument(skip_all)]
    pub async fn start(&self, callback: impl ServerCallback) -> Result<()> {
        self.send(Command::Start {
            callback: Arc::new(callback),
        })
        .await
    }

    /// Starts the server and waits for the outcome
    pub async fn start_and_wait(&self) -> Result<Endpoint> {
        let (tx, rx) = oneshot::channel();
        self.start(OneshotCallback(Mutex::new(Some(tx)))).await?;
        rx.await.map_err(|_| Error::SupervisorGone)?
    }

    /// Stops the server. A no-op when nothing is running.
    #[tracing::instrument(skip_all)]
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Stops, waits the grace period, and starts again. Not atomic with
    /// respect to other callers.
    #[tracing::instrument(skip_all)]
    pub async fn restart(&self, callback: impl ServerCallback) -> Result<()> {
        self.lifecycle
            .record(None, LifecycleEvent::Restarted, None)?;
        self.stop().await?;
        time::sleep(self.config.grace_period()).await;
        self.start(callback).await
    }

    /// Whether a server process exists and has not exited
    pub async fn is_running(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IsRunning { reply }).await?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Address of the running server, if any
    pub async fn endpoint(&self) -> Result<Option<Endpoint>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Endpoint { reply }).await?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Waits for the running server to end.
    ///
    /// Returns `None` immediately when no server is running.
    pub async fn wait_for_exit(&self) -> Result<Option<ExitInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ExitWatch { reply }).await?;
        match rx.await.map_err(|_| Error::SupervisorGone)? {
            Some(exit) => Ok(Some(wait_exit(exit).await)),
            None => Ok(None),
        }
    }

    /// Stops the server and ends the supervisor task
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Current status
    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    /// Status updates
    pub fn status_watch(&self) -> watch::Receiver<ServerStatus> {
        self.status.clone()
    }

    /// Subscribe to supervisor events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Supervisor events as a stream; lagged events are skipped
    pub fn events(&self) -> impl Stream<Item = SupervisorEvent> + Send + 'static {
        let mut rx = self.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Lifecycle history
    pub fn lifecycle(&self) -> &LifecycleLog {
        &self.lifecycle
    }

    /// Configuration the supervisor was created with
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::SupervisorGone)
    }
}

/// Immutable inputs of a start attempt
struct StartContext {
    config: Arc<SupervisorConfig>,
    store: Arc<dyn AssetStore>,
    abis: Vec<String>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl StartContext {
    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }
}

struct InFlightStart {
    attempt: u64,
    task: JoinHandle<()>,
    callbacks: Vec<Arc<dyn ServerCallback>>,
    /// Exit watch of the child, once the attempt has spawned one
    spawned: oneshot::Receiver<watch::Receiver<Option<ExitInfo>>>,
}

struct SupervisorTask {
    context: Arc<StartContext>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<ServerStatus>,
    events: broadcast::Sender<SupervisorEvent>,
    lifecycle: LifecycleLog,
    current: Option<ServerProcess>,
    in_flight: Option<InFlightStart>,
    attempts: u64,
}

impl SupervisorTask {
    async fn run(mut self) {
        tracing::debug!("Supervisor task started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }
        }

        tracing::debug!("Supervisor task exiting");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { callback } => self.start(callback),
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::IsRunning { reply } => {
                let _ = reply.send(self.is_running());
            }
            Command::Endpoint { reply } => {
                let endpoint = self
                    .current
                    .as_ref()
                    .filter(|process| process.is_alive())
                    .map(|process| Endpoint {
                        ip: local_ipv4(),
                        port: process.port(),
                    });
                let _ = reply.send(endpoint);
            }
            Command::ExitWatch { reply } => {
                let watch = self
                    .current
                    .as_ref()
                    .filter(|process| process.is_alive())
                    .map(|process| process.exit_watch());
                let _ = reply.send(watch);
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|process| process.is_alive())
    }

    fn start(&mut self, callback: Arc<dyn ServerCallback>) {
        if let Some(process) = &self.current {
            if process.is_alive() {
                tracing::warn!(server_id = %process.id(), "Server is already running");
                notify(callback.as_ref(), |cb| cb.started(&local_ipv4(), process.port()));
                return;
            }

            // Exited but the exit notification has not been processed yet
            let server_id = process.id();
            let exit = process.exit_info();
            self.current = None;
            if let Some(exit) = exit {
                self.record_exit(server_id, exit);
            }
        }

        if let Some(in_flight) = &mut self.in_flight {
            tracing::debug!(attempt = in_flight.attempt, "Joining in-flight start");
            in_flight.callbacks.push(callback);
            return;
        }

        self.attempts += 1;
        let attempt = self.attempts;
        self.set_status(ServerStatus::Starting);

        let context = Arc::clone(&self.context);
        let internal_tx = self.internal_tx.clone();
        let first = Arc::clone(&callback);
        let (spawned_tx, spawned) = oneshot::channel();
        let task = tokio::spawn(async move {
            let outcome = run_start(&context, first.as_ref(), spawned_tx).await;
            let _ = internal_tx.send(Internal::StartFinished { attempt, outcome });
        });

        self.in_flight = Some(InFlightStart {
            attempt,
            task,
            callbacks: vec![callback],
            spawned,
        });
    }

    async fn stop(&mut self) {
        let mut stopped = false;

        if let Some(in_flight) = self.in_flight.take() {
            self.cancel_start(in_flight).await;
            stopped = true;
        }

        if let Some(process) = self.current.take() {
            let server_id = process.id();
            let exit = process.kill().await;
            tracing::info!(server_id = %server_id, code = ?exit.code, "Server stopped");
            self.record(Some(server_id), LifecycleEvent::Stopped, None);
            self.emit(SupervisorEvent::Stopped {
                server_id: Some(server_id),
            });
            stopped = true;
        } else if stopped {
            self.emit(SupervisorEvent::Stopped { server_id: None });
        }

        if stopped {
            self.set_status(ServerStatus::Stopped);
        } else {
            tracing::debug!("Stop requested but nothing is running");
        }
    }

    /// Aborts an in-flight start and returns once its child, if any, is reaped
    async fn cancel_start(&mut self, mut in_flight: InFlightStart) {
        in_flight.task.abort();
        let _ = (&mut in_flight.task).await;

        // A finished attempt may have queued its process; dropping it requests the kill
        while let Ok(message) = self.internal_rx.try_recv() {
            self.handle_internal(message);
        }

        if let Ok(exit) = in_flight.spawned.try_recv() {
            let exit = wait_exit(exit).await;
            tracing::debug!(code = ?exit.code, "Child of cancelled start reaped");
        }

        let error = Error::Cancelled;
        for callback in &in_flight.callbacks {
            notify(callback.as_ref(), |cb| cb.failed(&error));
        }
        self.record(None, LifecycleEvent::Stopped, Some("start cancelled".to_string()));
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::StartFinished { attempt, outcome } => self.finish_start(attempt, outcome),
            Internal::Exited { server_id, exit } => {
                let is_current = self
                    .current
                    .as_ref()
                    .is_some_and(|process| process.id() == server_id);
                if is_current && !exit.killed {
                    self.current = None;
                    self.record_exit(server_id, exit);
                }
            }
        }
    }

    fn finish_start(&mut self, attempt: u64, outcome: Result<(ServerProcess, Endpoint)>) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.attempt == attempt => in_flight,
            other => {
                // Cancelled by a stop; a spawned process is killed on drop
                self.in_flight = other;
                tracing::debug!(attempt, "Discarding outcome of a cancelled start");
                return;
            }
        };

        match outcome {
            Ok((process, endpoint)) => {
                let server_id = process.id();
                let started = SupervisorEvent::Started {
                    server_id,
                    pid: process.pid(),
                    architecture: process.architecture(),
                    ip: endpoint.ip.clone(),
                    port: endpoint.port,
                };
                self.watch_exit(&process);
                self.current = Some(process);
                self.set_status(ServerStatus::Running);
                self.record(
                    Some(server_id),
                    LifecycleEvent::Started,
                    Some(format!("{}:{}", endpoint.ip, endpoint.port)),
                );
                self.emit(started);

                tracing::info!(server_id = %server_id, ip = %endpoint.ip, port = endpoint.port, "Server started");
                for callback in &in_flight.callbacks {
                    notify(callback.as_ref(), |cb| cb.started(&endpoint.ip, endpoint.port));
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Failed to start server");
                self.record(None, LifecycleEvent::Failed(error.kind()), Some(error.to_string()));
                self.set_status(ServerStatus::Failed);
                self.emit(SupervisorEvent::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                });

                for callback in &in_flight.callbacks {
                    notify(callback.as_ref(), |cb| cb.failed(&error));
                }
            }
        }
    }

    fn watch_exit(&self, process: &ServerProcess) {
        let server_id = process.id();
        let exit = process.exit_watch();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let exit = wait_exit(exit).await;
            let _ = internal_tx.send(Internal::Exited { server_id, exit });
        });
    }

    fn record_exit(&mut self, server_id: ServerId, exit: ExitInfo) {
        tracing::warn!(server_id = %server_id, code = ?exit.code, "Server exited");
        self.record(
            Some(server_id),
            LifecycleEvent::Exited,
            exit.code.map(|code| format!("exit code {}", code)),
        );
        self.set_status(ServerStatus::Failed);
        self.emit(SupervisorEvent::Exited { server_id, exit });
    }

    fn record(&self, server_id: Option<ServerId>, event: LifecycleEvent, details: Option<String>) {
        if let Err(e) = self.lifecycle.record(server_id, event, details) {
            tracing::warn!(error = %e, "Failed to record lifecycle event");
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        if self.events.receiver_count() > 0 {
            tracing::debug!(?event, "Broadcasting supervisor event");
            let _ = self.events.send(event);
        }
    }

    fn set_status(&self, status: ServerStatus) {
        self.status.send_replace(status);
    }
}

/// Runs a host callback, containing any panic so the supervisor task survives it
fn notify(callback: &dyn ServerCallback, call: impl FnOnce(&dyn ServerCallback)) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| call(callback))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(panic = %message, "Server callback panicked");
    }
}

enum ReadinessWait {
    Ready(Readiness),
    OutputClosed,
    Exited,
    TimedOut,
}

/// The start sequence: resolve, install, spawn, await readiness, check liveness
async fn run_start(
    context: &StartContext,
    callback: &dyn ServerCallback,
    spawned: oneshot::Sender<watch::Receiver<Option<ExitInfo>>>,
) -> Result<(ServerProcess, Endpoint)> {
    let config = &context.config;

    let architecture = Architecture::resolve(&context.abis);
    tracing::info!(%architecture, "Detected device architecture");
    notify(callback, |cb| cb.architecture_detected(architecture));
    context.emit(SupervisorEvent::ArchitectureDetected { architecture });

    let installed = ensure_installed(
        context.store.as_ref(),
        architecture.asset_path(),
        &config.binary_path(),
    )
    .await?;
    context.emit(SupervisorEvent::Installed {
        path: installed.path.clone(),
        copied: installed.copied,
    });

    let spec = LaunchSpec {
        architecture,
        binary_path: installed.path,
        storage_dir: config.storage_dir.clone(),
        env: config.env.clone(),
        default_port: config.default_port,
    };

    let spawned_at = Instant::now();
    let (process, ready) = ServerProcess::spawn(&spec).await?;
    let _ = spawned.send(process.exit_watch());

    match wait_for_readiness(&process, ready, config.readiness_timeout()).await {
        ReadinessWait::Ready(readiness) => {
            tracing::debug!(port = ?readiness.port, "Readiness line observed");
        }
        ReadinessWait::OutputClosed => {
            tracing::debug!("Server output closed before a readiness line");
        }
        ReadinessWait::Exited => {
            tracing::debug!("Server exited before a readiness line");
        }
        ReadinessWait::TimedOut => {
            tracing::warn!(
                timeout = ?config.readiness_timeout(),
                port = process.port(),
                "No readiness line from server, assuming current port"
            );
        }
    }

    // Give an immediately crashing child time to show it
    time::sleep_until(spawned_at + config.grace_period()).await;

    if let Some(exit) = process.exit_info() {
        tracing::error!(code = ?exit.code, "Server process died immediately");
        return Err(Error::DiedImmediately { code: exit.code });
    }

    let endpoint = Endpoint {
        ip: local_ipv4(),
        port: process.port(),
    };
    Ok((process, endpoint))
}

async fn wait_for_readiness(
    process: &ServerProcess,
    ready: oneshot::Receiver<Readiness>,
    timeout: Duration,
) -> ReadinessWait {
    let mut exit = process.exit_watch();
    let wait = async {
        tokio::select! {
            ready = ready => match ready {
                Ok(readiness) => ReadinessWait::Ready(readiness),
                Err(_) => ReadinessWait::OutputClosed,
            },
            _ = exit.wait_for(|exit| exit.is_some()) => ReadinessWait::Exited,
        }
    };

    time::timeout(timeout, wait)
        .await
        .unwrap_or(ReadinessWait::TimedOut)
}
