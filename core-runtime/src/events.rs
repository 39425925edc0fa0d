//! # Event Bus System
//!
//! Provides an event-driven architecture for the setlist core using
//! `tokio::sync::broadcast`. Modules publish typed events; hosts subscribe to
//! drive UI such as the pending-changes badge or the live-queue indicator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐
//! │ Sync Engine ├──────────────>│           │
//! └─────────────┘               │ EventBus  │     subscribe    ┌────────────┐
//! ┌─────────────┐     emit      │ (broadcast├─────────────────>│ Subscriber │
//! │  Realtime   ├──────────────>│  channel) │                  └────────────┘
//! └─────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::MutationQueued {
//!         mutation_id: "4b0c".to_string(),
//!         kind: "create_song".to_string(),
//!         pending: 1,
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; non-fatal.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns `Err`; publishers ignore it with `.ok()`.

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

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Offline queue and flush events
    Sync(SyncEvent),
    /// Local repertoire state events
    Repertoire(RepertoireEvent),
    /// Live audience-request channel events
    Realtime(RealtimeEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Repertoire(e) => e.description(),
            CoreEvent::Realtime(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::MutationDropped { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::FlushHalted { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::FlushCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Repertoire(RepertoireEvent::ActiveSetlistChanged { .. }) => {
                EventSeverity::Info
            }
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

/// Events emitted by the mutation queue and the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// An offline edit was recorded.
    MutationQueued {
        mutation_id: String,
        /// Wire name of the mutation kind (e.g. "add_setlist_item").
        kind: String,
        /// Queue length after the append.
        pending: usize,
    },
    /// A flush cycle started draining the queue.
    FlushStarted { pending: usize },
    /// A mutation was rejected by the server and discarded.
    MutationDropped {
        mutation_id: String,
        kind: String,
        reason: String,
    },
    /// The flush stopped early because the server was unreachable.
    FlushHalted { applied: usize, remaining: usize },
    /// A flush cycle applied at least one mutation.
    FlushCompleted {
        applied: usize,
        dropped: usize,
        remaining: usize,
        /// One-line confirmation suitable for display.
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::MutationQueued { .. } => "Offline change queued",
            SyncEvent::FlushStarted { .. } => "Syncing offline changes",
            SyncEvent::MutationDropped { .. } => "Offline change rejected by server",
            SyncEvent::FlushHalted { .. } => "Sync paused until connectivity returns",
            SyncEvent::FlushCompleted { .. } => "Offline changes synced",
        }
    }
}

// ============================================================================
// Repertoire Events
// ============================================================================

/// Events related to the locally held repertoire view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RepertoireEvent {
    /// The offline snapshot was replaced with fresh server data.
    SnapshotRefreshed { songs: usize, setlists: usize },
    /// The user switched setlists.
    ActiveSetlistChanged { setlist_id: Option<i64> },
}

impl RepertoireEvent {
    fn description(&self) -> &str {
        match self {
            RepertoireEvent::SnapshotRefreshed { .. } => "Offline snapshot refreshed",
            RepertoireEvent::ActiveSetlistChanged { .. } => "Active setlist changed",
        }
    }
}

// ============================================================================
// Realtime Events
// ============================================================================

/// Events from the audience-request channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RealtimeEvent {
    /// Connection state changed ("connecting", "connected", ...).
    StateChanged {
        setlist_id: Option<i64>,
        state: String,
    },
    /// The request list was re-fetched.
    RequestsUpdated { setlist_id: i64, count: usize },
}

impl RealtimeEvent {
    fn description(&self) -> &str {
        match self {
            RealtimeEvent::StateChanged { .. } => "Live queue connection state changed",
            RealtimeEvent::RequestsUpdated { .. } => "Audience requests updated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every `subscribe()` call creates an
/// independent receiver that sees only events emitted after it was created.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
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

    /// Creates a new subscriber to receive events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
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
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::default();
/// let realtime_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Realtime(_)));
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

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
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

    fn flush_completed() -> CoreEvent {
        CoreEvent::Sync(SyncEvent::FlushCompleted {
            applied: 2,
            dropped: 0,
            remaining: 0,
            message: "Offline changes synced.".to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(flush_completed()).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(flush_completed()).unwrap(), 2);

        assert_eq!(first.recv().await.unwrap(), flush_completed());
        assert_eq!(second.recv().await.unwrap(), flush_completed());
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Realtime(_)));

        bus.emit(flush_completed()).ok();
        bus.emit(CoreEvent::Realtime(RealtimeEvent::StateChanged {
            setlist_id: Some(3),
            state: "connected".to_string(),
        }))
        .ok();

        let event = stream.recv().await.unwrap();
        assert!(matches!(
            event,
            CoreEvent::Realtime(RealtimeEvent::StateChanged { .. })
        ));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for pending in 0..5 {
            bus.emit(CoreEvent::Sync(SyncEvent::FlushStarted { pending }))
                .ok();
        }

        assert!(matches!(receiver.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(flush_completed().severity(), EventSeverity::Info);
        assert_eq!(
            CoreEvent::Sync(SyncEvent::MutationDropped {
                mutation_id: "m1".to_string(),
                kind: "rename_setlist".to_string(),
                reason: "Not found".to_string(),
            })
            .severity(),
            EventSeverity::Warning
        );
        assert_eq!(
            CoreEvent::Realtime(RealtimeEvent::RequestsUpdated {
                setlist_id: 1,
                count: 4
            })
            .severity(),
            EventSeverity::Debug
        );
    }

    #[test]
    fn test_event_description() {
        assert_eq!(flush_completed().description(), "Offline changes synced");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Repertoire(RepertoireEvent::ActiveSetlistChanged {
            setlist_id: Some(7),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Repertoire");
        assert_eq!(json["payload"]["event"], "ActiveSetlistChanged");
        assert_eq!(json["payload"]["setlist_id"], 7);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
