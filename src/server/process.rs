// src/server/process.rs
use crate::error::{Error, Result};
use crate::server::arch::Architecture;
use crate::server::output::{Readiness, merged_lines, spawn_output_reader};
use async_process::{Child, Command, Stdio};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

/// Spawn attempts made while a freshly installed binary is still busy
const SPAWN_BUSY_RETRIES: u64 = 5;

/// Unique identifier for one spawned server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ServerId(Uuid);

impl ServerId {
    // Private constructor, only usable within our crate
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of the supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerStatus {
    /// No start has been attempted yet
    NotStarted,
    /// A start attempt is in flight
    Starting,
    /// The server is up
    Running,
    /// The last start failed or the server exited on its own
    Failed,
    /// The server was stopped on request
    Stopped,
}

/// How a server process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Whether the process exited successfully
    pub success: bool,
    /// Whether the supervisor killed it
    pub killed: bool,
}

/// Everything needed to launch the server binary
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Architecture the binary was selected for
    pub architecture: Architecture,
    /// Installed, executable binary
    pub binary_path: PathBuf,
    /// Upload directory; sole argument and working directory
    pub storage_dir: PathBuf,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Port assumed until the server announces one
    pub default_port: u16,
}

/// A spawned server process.
///
/// The OS child is owned by a monitor task; this handle observes it and can
/// ask for it to be killed. Dropping the handle kills the child.
#[derive(Debug)]
pub struct ServerProcess {
    id: ServerId,
    architecture: Architecture,
    binary_path: PathBuf,
    pid: u32,
    port: watch::Receiver<u16>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ServerProcess {
    /// Spawns `<binary> <storage_dir>` with the storage directory as working
    /// directory and stderr merged into the stdout line stream.
    ///
    /// Returns the process handle and a receiver for the first readiness line.
    #[tracing::instrument(skip(spec), fields(binary = %spec.binary_path.display(), architecture = %spec.architecture))]
    pub async fn spawn(spec: &LaunchSpec) -> Result<(Self, oneshot::Receiver<Readiness>)> {
        let mut command = Command::new(&spec.binary_path);
        command
            .arg(&spec.storage_dir)
            .current_dir(&spec.storage_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = spawn_with_retry(&mut command).await?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Spawn("Failed to get stdout pipe from child process".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::Spawn("Failed to get stderr pipe from child process".to_string())
        })?;

        let id = ServerId::new();
        let (_reader, channels) =
            spawn_output_reader(id, merged_lines(stdout, stderr), spec.default_port);

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(monitor_child(id, child, kill_rx, exit_tx));

        tracing::info!(server_id = %id, pid, "Server process spawned");

        Ok((
            Self {
                id,
                architecture: spec.architecture,
                binary_path: spec.binary_path.clone(),
                pid,
                port: channels.port,
                exit: exit_rx,
                kill_tx: Some(kill_tx),
            },
            channels.ready,
        ))
    }

    /// Get the server ID
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Architecture the binary was selected for
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Installed binary this process runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Currently tracked port; the default until a readiness line is seen
    pub fn port(&self) -> u16 {
        *self.port.borrow()
    }

    /// True until the child's exit status is known
    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Exit details once the child has ended
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    /// A receiver that changes exactly once, when the child ends
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit.clone()
    }

    /// Waits until the child has ended
    pub async fn wait_for_exit(&self) -> ExitInfo {
        wait_exit(self.exit.clone()).await
    }

    /// Forcibly terminates the child and waits for it to be reaped
    pub async fn kill(mut self) -> ExitInfo {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        wait_exit(self.exit.clone()).await
    }
}

pub(crate) async fn wait_exit(mut exit: watch::Receiver<Option<ExitInfo>>) -> ExitInfo {
    let reported = match exit.wait_for(|info| info.is_some()).await {
        Ok(info) => *info,
        // Monitor task gone without reporting, only on runtime shutdown
        Err(_) => None,
    };
    reported.unwrap_or(ExitInfo {
        code: None,
        success: false,
        killed: true,
    })
}

async fn spawn_with_retry(command: &mut Command) -> Result<Child> {
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if is_text_busy(&e) && attempt < SPAWN_BUSY_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, "Binary busy, retrying spawn");
                tokio::time::sleep(Duration::from_millis(20 * attempt)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn server process");
                return Err(Error::Spawn(e.to_string()));
            }
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &io::Error) -> bool {
    false
}

async fn monitor_child(
    id: ServerId,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    // A dropped kill sender counts as a kill request
    let exited = tokio::select! {
        status = child.status() => Some(status),
        _ = kill_rx => None,
    };

    let killed = exited.is_none();
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.kill() {
                tracing::debug!(server_id = %id, error = %e, "Kill failed, process already gone");
            }
            child.status().await
        }
    };

    let info = match status {
        Ok(status) => ExitInfo {
            code: status.code(),
            success: status.success(),
            killed,
        },
        Err(e) => {
            tracing::warn!(server_id = %id, error = %e, "Failed to collect exit status");
            ExitInfo {
                code: None,
                success: false,
                killed,
            }
        }
    };

    tracing::info!(server_id = %id, code = ?info.code, killed, "Server process exited");
    exit_tx.send_replace(Some(info));
}
