use crate::error::{Error, FailureKind, Result};
use crate::server::{ServerId, ServerStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Maximum number of records kept
const MAX_RECORDS: usize = 1000;

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Server started and passed its liveness check
    Started,
    /// Server stopped on request
    Stopped,
    /// A start attempt failed
    Failed(FailureKind),
    /// A running server exited on its own
    Exited,
    /// A restart was requested
    Restarted,
}

impl LifecycleEvent {
    /// Status the server is in after this event
    pub fn status(&self) -> ServerStatus {
        match self {
            LifecycleEvent::Started => ServerStatus::Running,
            LifecycleEvent::Stopped => ServerStatus::Stopped,
            LifecycleEvent::Failed(_) | LifecycleEvent::Exited => ServerStatus::Failed,
            LifecycleEvent::Restarted => ServerStatus::Starting,
        }
    }
}

/// One entry of the lifecycle history
#[derive(Debug, Clone)]
pub struct LifecycleRecord {
    /// Process the event concerns; `None` when no process was spawned
    pub server_id: Option<ServerId>,
    /// Event type
    pub event: LifecycleEvent,
    /// Event timestamp
    pub timestamp: Instant,
    /// Event details
    pub details: Option<String>,
}

/// Bounded history of supervisor lifecycle events.
///
/// Cloning shares the same history.
#[derive(Debug, Clone, Default)]
pub struct LifecycleLog {
    records: Arc<Mutex<VecDeque<LifecycleRecord>>>,
}

impl LifecycleLog {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event
    pub fn record(
        &self,
        server_id: Option<ServerId>,
        event: LifecycleEvent,
        details: Option<String>,
    ) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle records".to_string()))?;

        records.push_back(LifecycleRecord {
            server_id,
            event,
            timestamp: Instant::now(),
            details,
        });

        // Limit event history
        if records.len() > MAX_RECORDS {
            records.pop_front();
        }

        Ok(())
    }

    /// Status implied by the most recent event
    pub fn last_status(&self) -> Result<ServerStatus> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle records".to_string()))?;

        Ok(records
            .back()
            .map(|record| record.event.status())
            .unwrap_or(ServerStatus::NotStarted))
    }

    /// Recent events for one server process, newest first
    pub fn server_events(&self, id: ServerId, limit: Option<usize>) -> Result<Vec<LifecycleRecord>> {
        self.collect(limit, |record| record.server_id == Some(id))
    }

    /// All recent events, newest first
    pub fn events(&self, limit: Option<usize>) -> Result<Vec<LifecycleRecord>> {
        self.collect(limit, |_| true)
    }

    /// Number of restarts recorded
    pub fn restart_count(&self) -> Result<usize> {
        Ok(self
            .collect(None, |record| record.event == LifecycleEvent::Restarted)?
            .len())
    }

    /// Clear events
    pub fn clear(&self) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle records".to_string()))?;

        records.clear();

        Ok(())
    }

    fn collect(
        &self,
        limit: Option<usize>,
        filter: impl Fn(&LifecycleRecord) -> bool,
    ) -> Result<Vec<LifecycleRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle records".to_string()))?;

        Ok(records
            .iter()
            .rev()
            .filter(|record| filter(record))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
