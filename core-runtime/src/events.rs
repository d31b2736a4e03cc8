//! # Event Bus System
//!
//! Broadcasts job and indexing lifecycle events using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The task server publishes one event per job state change and the indexer
//! publishes one event per finished ingestion. Nothing in the pipeline waits
//! on subscribers: emitting with no subscriber attached is not an error for
//! callers, they simply ignore the `SendError`.
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐     subscribe    ┌────────────┐
//! │ TaskServer  ├──────────────>│           ├─────────────────>│ Subscriber │
//! └─────────────┘               │ EventBus  │                  └────────────┘
//! ┌─────────────┐     emit      │           │     subscribe    ┌────────────┐
//! │  Indexer    ├──────────────>│           ├─────────────────>│ Subscriber │
//! └─────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, JobEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Job(JobEvent::Enqueued {
//!     job_id: "42".to_string(),
//!     task_name: "index_user".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Job(JobEvent::Enqueued { .. }))));
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, SendError},
};

pub use tokio::sync::broadcast::Receiver;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Queue and worker events
    Job(JobEvent),
    /// Ingestion pipeline events
    Indexing(IndexingEvent),
}

impl CoreEvent {
    /// Short human-readable summary
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Job(e) => e.description(),
            CoreEvent::Indexing(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Job(JobEvent::Failed { will_retry: false, .. }) => EventSeverity::Error,
            CoreEvent::Job(JobEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Indexing(IndexingEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Job(JobEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Indexing(IndexingEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// How loudly an event should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted by the job queue and its workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum JobEvent {
    /// A job was written to the queue.
    Enqueued { job_id: String, task_name: String },
    /// A worker claimed the job and invoked its handler.
    Started {
        job_id: String,
        task_name: String,
        worker: String,
        /// Delivery number, starting at 1
        attempt: u32,
    },
    /// The handler returned successfully.
    Completed {
        job_id: String,
        task_name: String,
        duration_ms: u64,
    },
    /// The handler failed or timed out.
    Failed {
        job_id: String,
        task_name: String,
        message: String,
        /// Whether the job went back to the queue for another delivery
        will_retry: bool,
    },
}

impl JobEvent {
    fn description(&self) -> &str {
        match self {
            JobEvent::Enqueued { .. } => "Job enqueued",
            JobEvent::Started { .. } => "Job started",
            JobEvent::Completed { .. } => "Job completed successfully",
            JobEvent::Failed { .. } => "Job failed",
        }
    }

    /// Id of the job this event refers to.
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Enqueued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }
}

/// Events emitted by the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum IndexingEvent {
    /// A batch of plays was written for a user.
    Completed {
        username: String,
        plays: u64,
        artists_created: u64,
        albums_created: u64,
        tracks_created: u64,
    },
    /// Ingestion aborted for a user.
    Failed { username: String, message: String },
}

impl IndexingEvent {
    fn description(&self) -> &str {
        match self {
            IndexingEvent::Completed { .. } => "User indexed successfully",
            IndexingEvent::Failed { .. } => "User indexing failed",
        }
    }
}

/// Central broadcast channel for core events.
///
/// Cloning an `EventBus` yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send `event` to every current subscriber.
    ///
    /// Fails only when nobody is subscribed; publishers ignore that.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

type Predicate = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let jobs_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Job(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<Predicate>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Next event accepted by the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` after `n` events were dropped for this
    /// subscriber, `RecvError::Closed` once every bus handle is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            if self.filter.as_ref().map_or(true, |accept| accept(&event)) {
                return Ok(event);
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
