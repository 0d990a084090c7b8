//! Pipeline controller: plan → submit → record → merge.
//!
//! One run works through its batch plan strictly sequentially. Concurrency
//! is deliberately absent: the inter-batch delay exists to respect a shared
//! provider rate limit, and issuing batches in parallel would defeat that
//! throttle while also breaking the in-order merge. Every network call and
//! every delay is an await point, so the surrounding runtime stays free.
//!
//! A failed batch is recorded and the run moves on — a document with one bad
//! page must not forfeit contacts extracted from its other pages. The only
//! early exit is the caller's cancel token, and even that returns the
//! partial [`PipelineRun`] assembled so far.

use crate::cancel::CancelToken;
use crate::client::{ExtractionClient, HttpVisionApi, VisionApi};
use crate::config::ExtractionConfig;
use crate::error::{BatchError, DeedscanError};
use crate::merge::{self, ContactRecord, METHOD_BATCH, METHOD_SINGLE};
use crate::planner;
use crate::report::{BatchReport, BatchStatus, PipelineRun};
use crate::assets::PageImage;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Run the extraction pipeline over an ordered page-image sequence.
///
/// This is the primary entry point for the library when the caller supplies
/// its own transport (tests, middleware, alternative providers). For the
/// stock HTTP transport see [`run_pipeline_http`].
///
/// Always returns a [`PipelineRun`]; per-batch failures and cancellation are
/// reported inside it rather than as an `Err`.
pub async fn run_pipeline(
    images: &[PageImage],
    api: Arc<dyn VisionApi>,
    config: &ExtractionConfig,
    cancel: &CancelToken,
) -> PipelineRun {
    let run_id = Uuid::new_v4().to_string();
    let started_at_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let run_start = Instant::now();

    info!(
        "Run {}: starting over {} pages ({} source)",
        run_id,
        images.len(),
        config.source_label()
    );

    // ── Step 1: Plan batches ─────────────────────────────────────────────
    let batches = planner::plan(images, config.max_batch_bytes);
    let batches_planned = batches.len();
    info!("Run {}: planned {} batches", run_id, batches_planned);

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(batches_planned, images.len());
    }

    // ── Step 2: Submit batches in order ──────────────────────────────────
    let client = ExtractionClient::new(api, config.clone());
    let mut per_batch: Vec<Vec<ContactRecord>> = Vec::new();
    let mut reports: Vec<BatchReport> = Vec::new();
    let mut errors: Vec<BatchError> = Vec::new();
    let mut succeeded = 0usize;
    let mut degraded_count = 0usize;
    let mut cancelled = false;

    for (i, batch) in batches.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(
                "Run {}: cancelled before batch {} of {}",
                run_id, i, batches_planned
            );
            cancelled = true;
            break;
        }

        // Proactive throttle between submissions, independent of backoff.
        if i > 0 && config.inter_batch_delay_ms > 0 {
            sleep(Duration::from_millis(config.inter_batch_delay_ms)).await;
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_start(batch.batch_index, batches_planned, batch.len());
        }

        // The staged payload buffers live inside `submit` and are released
        // on every exit path before the next iteration begins.
        match client.submit(batch, cancel).await {
            Ok(mut outcome) => {
                let method = if outcome.degraded {
                    METHOD_SINGLE
                } else {
                    METHOD_BATCH
                };
                for record in &mut outcome.contacts {
                    record.stamp_provenance(config.source_label(), method);
                }

                debug!(
                    "Run {}: batch {} {} with {} contacts in {}ms",
                    run_id,
                    batch.batch_index,
                    if outcome.degraded { "degraded" } else { "succeeded" },
                    outcome.contacts.len(),
                    outcome.elapsed_ms
                );

                if outcome.degraded {
                    degraded_count += 1;
                } else {
                    succeeded += 1;
                }

                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_complete(
                        batch.batch_index,
                        batches_planned,
                        outcome.contacts.len(),
                        outcome.degraded,
                    );
                }

                reports.push(BatchReport {
                    batch_index: batch.batch_index,
                    page_indices: batch.page_indices(),
                    total_size: batch.total_size,
                    status: if outcome.degraded {
                        BatchStatus::Degraded
                    } else {
                        BatchStatus::Succeeded
                    },
                    attempts: outcome.attempts,
                    elapsed_ms: outcome.elapsed_ms,
                    contacts_found: outcome.contacts.len(),
                });
                per_batch.push(outcome.contacts);
            }
            Err(failure) if matches!(failure.error, BatchError::Cancelled { .. }) => {
                info!("Run {}: cancelled during batch {}", run_id, batch.batch_index);
                cancelled = true;
                break;
            }
            Err(failure) => {
                warn!(
                    "Run {}: batch {} failed after {} attempts: {}",
                    run_id, batch.batch_index, failure.attempts, failure.error
                );

                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_error(
                        batch.batch_index,
                        batches_planned,
                        &failure.error.to_string(),
                    );
                }

                reports.push(BatchReport {
                    batch_index: batch.batch_index,
                    page_indices: batch.page_indices(),
                    total_size: batch.total_size,
                    status: BatchStatus::Failed,
                    attempts: failure.attempts,
                    elapsed_ms: failure.elapsed_ms,
                    contacts_found: 0,
                });
                errors.push(failure.error);
            }
        }
    }

    // ── Step 3: Merge in batch order ─────────────────────────────────────
    let contacts = merge::merge(per_batch);
    let total_contacts = contacts.len();

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(batches_planned, succeeded, degraded_count);
    }

    let duration_ms = run_start.elapsed().as_millis() as u64;
    info!(
        "Run {}: {}/{} batches resolved ({} degraded), {} contacts, {}ms",
        run_id,
        succeeded + degraded_count,
        batches_planned,
        degraded_count,
        total_contacts,
        duration_ms
    );

    PipelineRun {
        run_id,
        started_at_ms,
        duration_ms,
        cancelled,
        batches_planned,
        batches_succeeded: succeeded,
        batches_degraded: degraded_count,
        contacts,
        total_contacts,
        batches: reports,
        errors,
    }
}

/// Run the pipeline against the live HTTP transport built from `config`.
///
/// # Errors
/// Fails fast (before any submission) when no API key is configured or the
/// HTTP client cannot be constructed.
pub async fn run_pipeline_http(
    images: &[PageImage],
    config: &ExtractionConfig,
    cancel: &CancelToken,
) -> Result<PipelineRun, DeedscanError> {
    let api = Arc::new(HttpVisionApi::from_config(config)?);
    Ok(run_pipeline(images, api, config, cancel).await)
}
