//! Events delivered by the realtime channel.
//!
//! Handlers registered through [`EventDispatcher::register`] receive
//! every [`ChannelEvent`] on the channel task, once each, in the order
//! the frames arrived.

use std::sync::{Arc, RwLock};

use comfyqueue_core::models::job::{Job, JobStatus};
use comfyqueue_core::types::DbId;

/// Connection state of the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// First connection attempt in progress.
    Connecting,
    /// Handshake complete; events are flowing.
    Connected,
    /// The connection dropped and backoff retries are running.
    Reconnecting { attempt: u32 },
    /// Closed by the owner, or rejected by the server. Terminal.
    Disconnected,
}

/// What a job notification told us. Every field is optional because
/// the backend may send only a trigger (e.g. `{"file": "x.json"}`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobNotice {
    pub job_id: Option<DbId>,
    pub filename: Option<String>,
    pub status: Option<JobStatus>,
    /// Full updated entity, when the server includes one.
    pub job: Option<Job>,
}

/// An event surfaced by the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The connection state changed.
    StateChanged(ChannelState),
    /// `new_job`: a workflow upload created a job.
    JobCreated(JobNotice),
    /// `job_update`: a job moved to a new status.
    JobStatusChanged(JobNotice),
}

impl ChannelEvent {
    /// Whether this event concerns the job collection.
    pub fn affects_jobs(&self) -> bool {
        matches!(
            self,
            ChannelEvent::JobCreated(_) | ChannelEvent::JobStatusChanged(_)
        )
    }
}

/// Callback invoked for each channel event.
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Ordered list of registered handlers, shared with the channel task.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    /// Invoke every handler with `event`, in registration order.
    ///
    /// The handler list is snapshotted first so a handler may register
    /// further handlers without deadlocking.
    pub fn dispatch(&self, event: &ChannelEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
