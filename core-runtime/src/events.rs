//! # Event Bus System
//!
//! Provides an event-driven surface for the sync engine using `tokio::sync::broadcast`.
//! Hosts subscribe to follow sync progress and resource changes without
//! polling the record stores.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: `SyncEvent` for task lifecycle, `ResourceEvent` for mirrored rows
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Task runner  ├──────────────>│           │
//! └──────────────┘               │ EventBus  │     subscribe    ┌────────────┐
//!                                │ (broadcast├─────────────────>│ Subscriber │
//! ┌──────────────┐     emit      │  channel) │                  └────────────┘
//! │ Reconciler   ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Started {
//!         task_id: "task-1".to_string(),
//!         entity_type: "cloudaccount".to_string(),
//!         entity_id: "acc-1".to_string(),
//!     }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert_eq!(received.description(), "Sync started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscriber returns an error; the engine ignores it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync task lifecycle
    Sync(SyncEvent),
    /// Changes to mirrored resources
    Resource(ResourceEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Resource(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Completed { errors, .. }) if *errors > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Info,
            CoreEvent::Resource(ResourceEvent::Deleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of one sync task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Admitted and waiting for a worker.
    Queued {
        task_id: String,
        entity_type: String,
        entity_id: String,
    },
    /// A worker picked the task up.
    Started {
        task_id: String,
        entity_type: String,
        entity_id: String,
    },
    /// The task entered a new stage.
    StageChanged { task_id: String, stage: String },
    /// Finished; `errors` counts per-item failures.
    Completed {
        task_id: String,
        entity_type: String,
        entity_id: String,
        added: u64,
        updated: u64,
        deleted: u64,
        errors: u64,
        duration_ms: u64,
    },
    Failed {
        task_id: String,
        entity_type: String,
        entity_id: String,
        stage: String,
        message: String,
    },
    /// Cancelled while still queuing.
    Cancelled {
        task_id: String,
        entity_type: String,
        entity_id: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Queued { .. } => "Sync queued",
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::StageChanged { .. } => "Sync stage changed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            SyncEvent::Queued { task_id, .. }
            | SyncEvent::Started { task_id, .. }
            | SyncEvent::StageChanged { task_id, .. }
            | SyncEvent::Completed { task_id, .. }
            | SyncEvent::Failed { task_id, .. }
            | SyncEvent::Cancelled { task_id, .. } => task_id,
        }
    }
}

// ============================================================================
// Resource Events
// ============================================================================

/// A mirrored resource row changed during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ResourceEvent {
    Created {
        resource_type: String,
        id: String,
        name: String,
    },
    Updated {
        resource_type: String,
        id: String,
        /// Names of the fields that changed.
        fields: Vec<String>,
    },
    Deleted {
        resource_type: String,
        id: String,
        name: String,
    },
}

impl ResourceEvent {
    fn description(&self) -> &str {
        match self {
            ResourceEvent::Created { .. } => "Resource created",
            ResourceEvent::Updated { .. } => "Resource updated",
            ResourceEvent::Deleted { .. } => "Resource deleted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus yields another producer on the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
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
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let resource_stream = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Resource(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
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

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(task_id: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Started {
            task_id: task_id.to_string(),
            entity_type: "cloudprovider".to_string(),
            entity_id: "p1".to_string(),
        })
    }

    fn completed(errors: u64) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Completed {
            task_id: "t1".to_string(),
            entity_type: "cloudaccount".to_string(),
            entity_id: "a1".to_string(),
            added: 1,
            updated: 1,
            deleted: 1,
            errors,
            duration_ms: 12,
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(started("t1")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = started("t1");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Resource(_)));

        bus.emit(started("t1")).ok();
        let created = CoreEvent::Resource(ResourceEvent::Created {
            resource_type: "zone".to_string(),
            id: "z1".to_string(),
            name: "zone-a".to_string(),
        });
        bus.emit(created.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), created);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(started(&format!("t{}", i))).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(completed(0).severity(), EventSeverity::Info);
        assert_eq!(completed(2).severity(), EventSeverity::Warning);
        assert_eq!(started("t1").severity(), EventSeverity::Debug);

        let failed = CoreEvent::Sync(SyncEvent::Failed {
            task_id: "t1".to_string(),
            entity_type: "cloudprovider".to_string(),
            entity_id: "p1".to_string(),
            stage: "region_prepare".to_string(),
            message: "auth failure".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(failed.description(), "Sync failed");
    }

    #[test]
    fn test_task_id_accessor() {
        let event = SyncEvent::StageChanged {
            task_id: "t9".to_string(),
            stage: "fanout".to_string(),
        };
        assert_eq!(event.task_id(), "t9");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(completed(0)).unwrap();
        assert_eq!(json["type"], "Sync");
        assert_eq!(json["payload"]["event"], "Completed");
        assert_eq!(json["payload"]["added"], 1);
    }
}
