//! Event types for the Longbox event system
//!
//! Provides reconcile progress events and the EventBus used to fan them out
//! to any number of listeners (UI bridges, job trackers, logs).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline phase a progress event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Scanning,
    Applying,
    Resolving,
    Linking,
}

impl ReconcilePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePhase::Scanning => "scanning",
            ReconcilePhase::Applying => "applying",
            ReconcilePhase::Resolving => "resolving",
            ReconcilePhase::Linking => "linking",
        }
    }
}

/// Longbox event types
///
/// Events are broadcast via EventBus and serialise with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LongboxEvent {
    /// A reconcile pass started for a library
    ReconcileStarted {
        library_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress within one phase, emitted after each batch
    ReconcileProgress {
        library_id: Uuid,
        phase: ReconcilePhase,
        /// Items processed so far in this phase
        processed: usize,
        /// Items known to the phase (0 when not known up front)
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reconcile pass finished (possibly cancelled)
    ReconcileCompleted {
        library_id: Uuid,
        new_files: usize,
        series_created: usize,
        files_linked: usize,
        errors: usize,
        cancelled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A series record was created during resolution
    SeriesCreated {
        library_id: Uuid,
        series_id: Uuid,
        name: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - publish never blocks on slow subscribers
/// - lagging subscribers observe `RecvError::Lagged`
/// - dropping every receiver is fine; emits then return `Err`
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LongboxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LongboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LongboxEvent,
    ) -> Result<usize, broadcast::error::SendError<LongboxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LongboxEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
