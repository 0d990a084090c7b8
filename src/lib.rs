//! # deedscan
//!
//! Batch-and-retry extraction of contact/ownership records from scanned
//! document pages using vision LLM APIs.
//!
//! ## Why this crate?
//!
//! Scanned deeds, registration filings, and ownership schedules defeat
//! conventional OCR: the interesting data lives in tables that span page
//! boundaries, and per-page extraction loses the rows that straddle a
//! break. This crate submits consecutive page images *together* so the
//! model reads a continued table as one table — which immediately collides
//! with request-size ceilings, provider rate limits, and payload
//! rejections. The engine here is the part that makes those three
//! constraints coexist without losing or duplicating data.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page images (pre-rasterised, ordered)
//!  │
//!  ├─ 1. Plan    greedy order-preserving batches under an 8 MiB ceiling
//!  ├─ 2. Submit  one vision API request per batch, sequentially
//!  │             ├─ 429/529/timeout → exponential backoff, capped attempts
//!  │             └─ 413            → degrade once to per-image requests
//!  ├─ 3. Merge   concatenate in page order, stamp provenance, dedup
//!  └─ 4. Report  PipelineRun with counters, per-batch telemetry, errors
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deedscan::{load_ordered, run_pipeline_http, CancelToken, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key auto-detected from DEEDSCAN_API_KEY / ANTHROPIC_API_KEY
//!     let pages = load_ordered(&[
//!         "pages/page_000.png".into(),
//!         "pages/page_001.png".into(),
//!     ])
//!     .await?;
//!
//!     let config = ExtractionConfig::builder()
//!         .source_file("deed_0142.pdf")
//!         .build()?;
//!
//!     let run = run_pipeline_http(&pages, &config, &CancelToken::new()).await?;
//!     println!("{} contacts from {}/{} batches",
//!         run.total_contacts, run.batches_succeeded, run.batches_planned);
//!     Ok(())
//! }
//! ```
//!
//! ## Partial success is first-class
//!
//! A failed batch is recorded in [`PipelineRun::errors`] and the run
//! continues; check [`PipelineRun::is_complete_success`] /
//! [`PipelineRun::is_partial`] / [`PipelineRun::is_total_failure`] to
//! classify an outcome without reading logs. Cancellation (via
//! [`CancelToken`]) likewise returns the partial run instead of discarding
//! completed work.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deedscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! deedscan = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assets;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assets::{load_ordered, PageImage};
pub use cancel::CancelToken;
pub use client::{
    ApiReply, BatchFailure, BatchOutcome, ExtractionClient, HttpVisionApi, StagedImage, VisionApi,
};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, DEFAULT_MAX_BATCH_BYTES};
pub use error::{BatchError, DeedscanError};
pub use merge::{merge, ContactRecord, METHOD_BATCH, METHOD_SINGLE};
pub use pipeline::{run_pipeline, run_pipeline_http};
pub use planner::{plan, Batch};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use report::{BatchReport, BatchStatus, PipelineRun};
