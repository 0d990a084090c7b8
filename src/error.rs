//! Error types for the deedscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DeedscanError`] — **Fatal**: the pipeline cannot start at all
//!   (unreadable page image, invalid configuration, no API key). Returned as
//!   `Err(DeedscanError)` from setup and I/O entry points.
//!
//! * [`BatchError`] — **Non-fatal**: a single batch failed (rate limit
//!   exhausted, oversized image, malformed response) but other batches are
//!   fine. Stored inside [`crate::report::PipelineRun::errors`] so callers
//!   can inspect partial success rather than losing a whole document to one
//!   bad batch.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! batch failure, log and continue, or collect all errors for a post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the deedscan library.
///
/// Batch-level failures use [`BatchError`] and are stored in
/// [`crate::report::PipelineRun`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DeedscanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Page image file was not found at the given path.
    #[error("Page image not found: '{path}'\nCheck the path exists and is readable.")]
    ImageNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file was read but could not be decoded as a supported image.
    #[error("Not a decodable page image: '{path}': {detail}\nSupported formats: PNG, JPEG.")]
    UnreadableImage { path: PathBuf, detail: String },

    // ── API errors ────────────────────────────────────────────────────────
    /// No API key found in configuration or environment.
    #[error("No extraction API key configured.\nSet DEEDSCAN_API_KEY or ANTHROPIC_API_KEY, or pass one via the config builder.")]
    MissingApiKey,

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClientBuild(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output report file.
    #[error("Failed to write report file '{path}': {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single batch.
///
/// Stored in [`crate::report::PipelineRun::errors`] when a batch fails.
/// The overall run continues to the next batch; contacts extracted from a
/// document's other pages are never forfeited to one bad batch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BatchError {
    /// The API responded 200 but the body was not a JSON contact array.
    /// Malformed output is not a transient condition, so this is terminal
    /// for the batch and is never retried.
    #[error("Batch {batch_index}: response is not a JSON contact array: {detail}")]
    Parse { batch_index: usize, detail: String },

    /// The API kept returning 429/529 (or timing out) past the attempt cap.
    #[error("Batch {batch_index}: rate limited after {attempts} attempts\nLower the request rate or raise backoff_max_attempts.")]
    RateLimitExhausted { batch_index: usize, attempts: u32 },

    /// A single page image was rejected as too large (HTTP 413) even after
    /// the batch was degraded to per-image submission. It cannot be split
    /// further, so this is terminal.
    #[error("Page {page_index}: image rejected as too large ({byte_size} bytes)\nRe-rasterise the page at a lower resolution.")]
    ImageTooLarge { page_index: usize, byte_size: usize },

    /// Any other HTTP or network failure. Only rate-limit/overload signals
    /// are retried; unknown errors are surfaced, not masked.
    #[error("Batch {batch_index}: API error{}: {detail}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api {
        batch_index: usize,
        status: Option<u16>,
        detail: String,
    },

    /// The run's cancel token fired while this batch was backing off.
    /// The pipeline treats this as "stop here", not as a batch failure;
    /// it is never recorded in [`crate::report::PipelineRun::errors`].
    #[error("Batch {batch_index}: cancelled during backoff")]
    Cancelled { batch_index: usize },
}

impl BatchError {
    /// Which batch this error belongs to. [`BatchError::ImageTooLarge`]
    /// identifies a page instead; the owning batch index is carried by the
    /// caller's report entry.
    pub fn batch_index(&self) -> Option<usize> {
        match self {
            BatchError::Parse { batch_index, .. }
            | BatchError::RateLimitExhausted { batch_index, .. }
            | BatchError::Api { batch_index, .. }
            | BatchError::Cancelled { batch_index } => Some(*batch_index),
            BatchError::ImageTooLarge { .. } => None,
        }
    }
}
