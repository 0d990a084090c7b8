//! Progress-callback trait for per-batch pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline submits each batch.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a broadcast channel, a WebSocket, a database record, or
//! a terminal progress bar — without the library knowing anything about how
//! the host application communicates. The trait is `Send + Sync` so it works
//! when the caller drives several independent pipeline runs from different
//! tasks.

use std::sync::Arc;

/// Called by the pipeline controller as it works through the batch plan.
///
/// Within one run the callbacks fire strictly in batch order (the pipeline is
/// sequential), so implementations need no ordering logic of their own. All
/// methods have default no-op implementations so callers only override what
/// they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after planning, before any batch is submitted.
    fn on_run_start(&self, total_batches: usize, total_pages: usize) {
        let _ = (total_batches, total_pages);
    }

    /// Called just before a batch's first submission attempt.
    fn on_batch_start(&self, batch_index: usize, total_batches: usize, pages: usize) {
        let _ = (batch_index, total_batches, pages);
    }

    /// Called when a batch resolves successfully.
    ///
    /// `degraded` is true when the batch was recovered via per-image
    /// submission after a payload rejection.
    fn on_batch_complete(
        &self,
        batch_index: usize,
        total_batches: usize,
        contacts: usize,
        degraded: bool,
    ) {
        let _ = (batch_index, total_batches, contacts, degraded);
    }

    /// Called when a batch fails terminally after retries.
    fn on_batch_error(&self, batch_index: usize, total_batches: usize, error: &str) {
        let _ = (batch_index, total_batches, error);
    }

    /// Called once after the last batch (or at cancellation).
    fn on_run_complete(&self, total_batches: usize, succeeded: usize, degraded: usize) {
        let _ = (total_batches, succeeded, degraded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        degraded: AtomicUsize,
        errors: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_batch_start(&self, _b: usize, _t: usize, _p: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _b: usize, _t: usize, _c: usize, degraded: bool) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if degraded {
                self.degraded.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_batch_error(&self, _b: usize, _t: usize, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(3, 12);
        cb.on_batch_start(0, 3, 4);
        cb.on_batch_complete(0, 3, 7, false);
        cb.on_batch_error(1, 3, "some error");
        cb.on_run_complete(3, 2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            degraded: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        };

        tracker.on_batch_start(0, 2, 3);
        tracker.on_batch_complete(0, 2, 5, true);
        tracker.on_batch_start(1, 2, 3);
        tracker.on_batch_error(1, 2, "rate limited");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.degraded.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn PipelineProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_run_start(1, 1);
        cb.on_batch_complete(0, 1, 0, false);
    }
}
