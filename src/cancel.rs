//! Cooperative cancellation for a pipeline run.
//!
//! A cancelled run is a valid terminal state, not an error: the pipeline
//! checks the token between batches (and before every backoff wait) and
//! returns the partial [`crate::report::PipelineRun`] assembled so far.
//!
//! The token is a plain atomic flag rather than a channel so it can be
//! cloned into a Ctrl-C handler, an HTTP request guard, or a test without
//! any runtime machinery. Cancellation is one-way and sticky.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap clonable cancellation flag shared between a pipeline run and its
/// controller. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; cannot be undone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
