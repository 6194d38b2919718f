//! Cancellation and progress plumbing shared by every phase

use longbox_common::events::ReconcilePhase;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress after one batch of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub phase: ReconcilePhase,
    pub processed: usize,
    /// 0 when the phase does not know its size up front
    pub total: usize,
}

pub type CancelPredicate = Arc<dyn Fn() -> bool + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Caller-supplied run control
///
/// Cancellation is cooperative: phases check between batches, let work in
/// flight finish and start nothing new. The progress callback is called
/// inline after each batch and must return promptly.
#[derive(Clone, Default)]
pub struct ReconcileControl {
    should_cancel: Option<CancelPredicate>,
    token: Option<CancellationToken>,
    progress: Vec<ProgressCallback>,
}

impl ReconcileControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_should_cancel<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_cancel = Some(Arc::new(predicate));
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress.push(Arc::new(callback));
        self
    }

    pub fn should_cancel(&self) -> bool {
        self.token.as_ref().map_or(false, CancellationToken::is_cancelled)
            || self.should_cancel.as_ref().map_or(false, |f| f())
    }

    pub fn report(&self, phase: ReconcilePhase, processed: usize, total: usize) {
        let update = ProgressUpdate {
            phase,
            processed,
            total,
        };
        for callback in &self.progress {
            callback(update);
        }
    }
}

impl fmt::Debug for ReconcileControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileControl")
            .field("has_predicate", &self.should_cancel.is_some())
            .field("has_token", &self.token.is_some())
            .field("progress_callbacks", &self.progress.len())
            .finish()
    }
}
