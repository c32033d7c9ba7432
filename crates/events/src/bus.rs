//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the scheduler, the
//! job service and the exporter. Observers subscribe for as long as they
//! live; dropping the receiver unsubscribes.

use chrono::{DateTime, Utc};
use clipchain_core::types::DbId;
use clipchain_db::models::status::JobStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// A change observers may want to refresh on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    ClipStatusChanged {
        clip_id: DbId,
        video_id: DbId,
        status: JobStatus,
        at: DateTime<Utc>,
    },
    VideoStatusChanged {
        video_id: DbId,
        status: JobStatus,
        at: DateTime<Utc>,
    },
    ClipDeleted {
        clip_id: DbId,
        video_id: DbId,
        at: DateTime<Utc>,
    },
    VideoDeleted {
        video_id: DbId,
        at: DateTime<Utc>,
    },
}

impl StatusEvent {
    pub fn clip_status(clip_id: DbId, video_id: DbId, status: JobStatus) -> Self {
        StatusEvent::ClipStatusChanged {
            clip_id,
            video_id,
            status,
            at: Utc::now(),
        }
    }

    pub fn video_status(video_id: DbId, status: JobStatus) -> Self {
        StatusEvent::VideoStatusChanged {
            video_id,
            status,
            at: Utc::now(),
        }
    }

    pub fn clip_deleted(clip_id: DbId, video_id: DbId) -> Self {
        StatusEvent::ClipDeleted {
            clip_id,
            video_id,
            at: Utc::now(),
        }
    }

    pub fn video_deleted(video_id: DbId) -> Self {
        StatusEvent::VideoDeleted {
            video_id,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use clipchain_db::models::status::JobStatus;
/// use clipchain_events::bus::{EventBus, StatusEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(StatusEvent::video_status(1, JobStatus::Queued));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
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
    pub fn publish(&self, event: StatusEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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
