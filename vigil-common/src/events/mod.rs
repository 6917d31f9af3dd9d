//! Event types for the Vigil output boundary
//!
//! Provides the shared event enum and the EventBus used to broadcast
//! pipeline outcomes (fired/cancelled filters, adjustment proposals,
//! structured warnings) to all connected consumers.
//!
//! # Architecture
//!
//! Vigil uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting
//! - **Shared state** (Arc<RwLock<T>>): read-heavy session state
//!
//! Events are serializable for SSE transmission; delivery is at-most-once
//! per detection id and receivers must treat instructions as idempotent.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{
    AdjustmentNotification, FilterCategory, FilterInstruction, LearnedPreference, Modality,
};

/// Why a scheduled filter was cancelled before firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A user chose to reveal the content
    UserOverride,
    /// The stream ended; not a user choice and never counted as an override
    Teardown,
}

/// Vigil event types
///
/// Broadcast via EventBus and serialized for SSE transmission. All events
/// use this central enum for exhaustive matching at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VigilEvent {
    /// A stream session started
    StreamStarted {
        stream_id: Uuid,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A stream session ended; all pending filters were force-cancelled
    StreamStopped {
        stream_id: Uuid,
        /// Number of pending filters cancelled at teardown
        cancelled_pending: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A viewer joined the stream
    ViewerJoined {
        stream_id: Uuid,
        viewer_id: String,
        viewer_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A viewer left the stream
    ViewerLeft {
        stream_id: Uuid,
        viewer_id: String,
        viewer_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A suppression instruction entered the delay buffer
    FilterScheduled {
        stream_id: Uuid,
        detection_id: Uuid,
        category: FilterCategory,
        /// Deadline on the stream timeline (ms)
        fire_at_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A scheduled filter reached its deadline and was applied
    ///
    /// Delivered at most once per detection id.
    FilterFired {
        stream_id: Uuid,
        instruction: FilterInstruction,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A scheduled filter was cancelled before its deadline
    FilterCancelled {
        stream_id: Uuid,
        detection_id: Uuid,
        reason: CancelReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The learning engine proposed a threshold adjustment
    ///
    /// The proposal stays pending until the user responds or it expires.
    AdjustmentProposed {
        user_id: String,
        notification: AdjustmentNotification,
        expires_at_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A proposed adjustment was accepted and committed
    AdjustmentCommitted {
        user_id: String,
        preference: LearnedPreference,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A response arrived for a proposal that had already expired
    ///
    /// Expiry is an explicit outcome; it is never treated as acceptance.
    AdjustmentExpired {
        user_id: String,
        category: FilterCategory,
        subcategory: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Analysis was unavailable or failed; the pipeline stayed fail-open
    AnalysisWarning {
        stream_id: Uuid,
        modality: Modality,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl VigilEvent {
    /// SSE event name for this variant
    pub fn name(&self) -> &'static str {
        match self {
            VigilEvent::StreamStarted { .. } => "stream_started",
            VigilEvent::StreamStopped { .. } => "stream_stopped",
            VigilEvent::ViewerJoined { .. } => "viewer_joined",
            VigilEvent::ViewerLeft { .. } => "viewer_left",
            VigilEvent::FilterScheduled { .. } => "filter_scheduled",
            VigilEvent::FilterFired { .. } => "filter_fired",
            VigilEvent::FilterCancelled { .. } => "filter_cancelled",
            VigilEvent::AdjustmentProposed { .. } => "adjustment_proposed",
            VigilEvent::AdjustmentCommitted { .. } => "adjustment_committed",
            VigilEvent::AdjustmentExpired { .. } => "adjustment_expired",
            VigilEvent::AnalysisWarning { .. } => "analysis_warning",
        }
    }
}

/// One-to-many event broadcaster backed by tokio::broadcast
///
/// Subscribers receive events emitted after subscription; slow subscribers
/// may lag and drop the oldest buffered events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VigilEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    ///
    /// ```
    /// use vigil_common::events::EventBus;
    ///
    /// let bus = EventBus::new(100);
    /// assert_eq!(bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VigilEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if no subscribers exist.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: VigilEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<VigilEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: VigilEvent) {
        let _ = self.tx.send(event);
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
