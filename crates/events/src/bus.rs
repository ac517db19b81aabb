//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`SessionEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` across the session.

use chrono::Utc;
use framesync_core::types::{FrameId, TaskMode, Timestamp};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient, user-visible message (toast).
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: Timestamp,
}

/// An observable change to the session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The result list was replaced wholesale.
    ResultsReplaced { count: usize },

    /// A pagination page was appended.
    PageAppended { page: u32, count: usize },

    /// A pagination page arrived out of sequence and was not applied.
    PageDropped { page: u32, expected: u32 },

    /// The object filter changed.
    SelectionChanged { selected: Vec<String> },

    TaskModeChanged { mode: TaskMode },

    /// The export selection changed (local or remote edit).
    ExportsChanged { count: usize },

    AnnotationChanged { frame_id: FrameId, text: String },

    LoadingChanged { loading: bool },

    /// The backend echoed the (possibly translated) text queries it ran.
    QueriesEchoed { first: String, next: String },

    /// A peer shared a query.
    SharedQueryReceived { query: String },

    Notice(Notice),

    /// A channel became ready or stopped being ready.
    ChannelStatus { endpoint: String, ready: bool },
}

impl SessionEvent {
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        SessionEvent::Notice(Notice {
            level,
            message: message.into(),
            at: Utc::now(),
        })
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Error, message)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`SessionEvent`].
///
/// # Usage
///
/// ```rust
/// use framesync_events::bus::{EventBus, SessionEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SessionEvent::LoadingChanged { loading: true });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: SessionEvent) {
        tracing::trace!(?event, "Publishing session event");
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
