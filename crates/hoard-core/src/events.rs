//! Run lifecycle events.
//!
//! Subscribers receive events over a broadcast channel, so a slow or vanished
//! consumer can neither block nor crash the worker emitting them.

use std::fmt;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initialize,
    Running,
    Paused,
    Cleanup,
    Finalize,
    Ended,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Initialize => "initializing",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Cleanup => "cleaning up",
            RunState::Finalize => "finalizing",
            RunState::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Usually transient (a locked or vanished file); the item is recorded as failed.
    Warning,
    /// A subtree or location could not be backed up, or the run itself failed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    CompletedWithWarnings,
    Stopped,
    Aborted,
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    StatusChanged {
        state: RunState,
        current_path: Option<String>,
        processed: u64,
        /// Estimate from the counter task; `None` until it has produced one.
        total: Option<u64>,
    },
    ItemError(Issue),
    RunEnded {
        backup_id: Option<i64>,
        outcome: RunOutcome,
    },
    CheckProgress {
        checked: u64,
        total: u64,
    },
    RestoreProgress {
        restored: u64,
        current_path: String,
    },
}

pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: RunEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
