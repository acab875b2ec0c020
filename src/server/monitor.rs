use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::server::process::ServerStatus;
use crate::server::supervisor::{LoggingCallback, Supervisor, SupervisorEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

/// Restart monitor configuration
#[derive(Debug, Clone)]
pub struct RestartMonitorConfig {
    /// Delay before restarting after a failure
    pub retry_delay: Duration,
    /// Restart when a running server exits on its own
    pub restart_on_exit: bool,
}

impl Default for RestartMonitorConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            restart_on_exit: true,
        }
    }
}

impl From<&SupervisorConfig> for RestartMonitorConfig {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            restart_on_exit: config.restart_on_exit,
        }
    }
}

/// Keeps the server up by restarting it after failures.
///
/// Retries forever with a fixed delay; there is no backoff and no cap.
pub struct RestartMonitor {
    /// Supervisor being watched
    supervisor: Supervisor,
    /// Monitor configuration
    config: RestartMonitorConfig,
    /// Monitor task
    monitor_task: Option<JoinHandle<()>>,
    /// Restarts issued so far
    restarts: Arc<AtomicU64>,
}

impl RestartMonitor {
    /// Create a new restart monitor
    pub fn new(supervisor: Supervisor, config: RestartMonitorConfig) -> Self {
        Self {
            supervisor,
            config,
            monitor_task: None,
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the monitor
    pub fn start(&mut self) -> Result<()> {
        if self.monitor_task.is_some() {
            return Ok(());
        }

        let supervisor = self.supervisor.clone();
        let config = self.config.clone();
        let restarts = Arc::clone(&self.restarts);
        let mut events = self.supervisor.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Restart monitor lagged behind events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let reason = match &event {
                    SupervisorEvent::Failed { kind, message } if kind.is_retryable() => {
                        message.clone()
                    }
                    SupervisorEvent::Exited { exit, .. } if config.restart_on_exit => {
                        format!("server exited with {:?}", exit.code)
                    }
                    _ => continue,
                };

                tracing::info!(
                    delay = ?config.retry_delay,
                    %reason,
                    "Restarting server after delay"
                );
                time::sleep(config.retry_delay).await;

                // The host may have brought the server back while we waited
                if supervisor.status() == ServerStatus::Starting {
                    tracing::debug!("Start already in flight, skipping restart");
                    continue;
                }
                match supervisor.is_running().await {
                    Ok(true) => {
                        tracing::debug!("Server already running, skipping restart");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "Supervisor gone, stopping restart monitor");
                        break;
                    }
                }

                restarts.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = supervisor.restart(LoggingCallback).await {
                    tracing::error!(error = %e, "Failed to request restart");
                    if matches!(e, Error::SupervisorGone) {
                        break;
                    }
                }
            }

            tracing::debug!("Restart monitor exiting");
        });

        self.monitor_task = Some(task);

        Ok(())
    }

    /// Stop the monitor
    pub fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }

        Ok(())
    }

    /// Whether the monitor task is active
    pub fn is_active(&self) -> bool {
        self.monitor_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Restarts issued so far
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl Drop for RestartMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }
    }
}
