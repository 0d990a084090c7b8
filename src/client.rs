//! Extraction client: drive one batch through the vision API.
//!
//! This is the resilience core of the engine. Each batch runs through an
//! explicit state machine — attempt, backoff, degrade, resolve — so the
//! policy reads the same whether the transport is live HTTP or a scripted
//! test double behind the [`VisionApi`] seam.
//!
//! ## Retry strategy
//!
//! 429 (rate limited), 529 (overloaded), and request timeouts are transient
//! by definition; they back off exponentially (`backoff_base_ms *
//! 2^(attempt-1)`, capped) up to `backoff_max_attempts`. With the default
//! 1.5 s base the wait sequence is 1.5 s → 3 s → 6 s → 12 s.
//!
//! ## Degradation
//!
//! 413 (payload too large) is not transient — resubmitting the same body
//! cannot succeed. For a multi-image batch the client degrades exactly once:
//! it resubmits each image individually under the same retry rules and
//! merges the per-image arrays in page order. A 413 against a single image
//! is terminal; there is nothing left to split.
//!
//! Everything else fails the batch immediately. Unknown errors are
//! surfaced, not masked by retries.

use crate::assets::PageImage;
use crate::cancel::CancelToken;
use crate::config::ExtractionConfig;
use crate::error::{BatchError, DeedscanError};
use crate::merge::ContactRecord;
use crate::planner::Batch;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

// ── API seam ─────────────────────────────────────────────────────────────

/// One page image staged for submission: base64 payload plus metadata.
///
/// Staging happens once per batch and the buffers are dropped when the
/// batch resolves, whichever way it resolves.
#[derive(Debug, Clone)]
pub struct StagedImage {
    /// Original page index, for per-image degradation and error reporting.
    pub page_index: usize,
    /// MIME type of the encoded payload.
    pub media_type: &'static str,
    /// Base64-encoded image bytes.
    pub data: String,
    /// Pre-encoding byte size, for error messages.
    pub byte_size: usize,
}

impl StagedImage {
    fn from_page(page: &PageImage) -> Self {
        Self {
            page_index: page.index,
            media_type: page.media_type(),
            data: STANDARD.encode(&page.bytes),
            byte_size: page.byte_size(),
        }
    }
}

/// Classified outcome of one HTTP call to the extraction API.
///
/// The transport reduces every response to one of these variants so the
/// retry state machine never touches status codes or `reqwest` types, and
/// tests can script replies directly.
#[derive(Debug, Clone)]
pub enum ApiReply {
    /// HTTP 200: the model's text answer (expected to be a JSON array).
    Success(String),
    /// HTTP 429.
    RateLimited,
    /// HTTP 529.
    Overloaded,
    /// HTTP 413.
    PayloadTooLarge,
    /// The request exceeded the configured timeout.
    TimedOut,
    /// Any other HTTP status or network failure.
    Failed { status: Option<u16>, detail: String },
}

/// Transport boundary to the vision extraction API.
///
/// One call = one request carrying `images` (in page order) plus the fixed
/// instruction payload. Implementations classify the response; they never
/// retry — retry policy belongs to [`ExtractionClient`].
#[async_trait]
pub trait VisionApi: Send + Sync {
    async fn extract(&self, images: &[StagedImage], prompt: &str) -> ApiReply;
}

// ── Client state machine ─────────────────────────────────────────────────

/// Terminal result of one batch submission.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Parsed contact records, in page order.
    pub contacts: Vec<ContactRecord>,
    /// Attempts consumed by the batch-level request (degraded per-image
    /// attempts are not counted here).
    pub attempts: u32,
    /// True when the batch was recovered via per-image submission.
    pub degraded: bool,
    /// Wall-clock time from staging to resolution.
    pub elapsed_ms: u64,
}

/// Terminal failure of one batch submission, carrying the telemetry the
/// batch consumed before failing so reports don't lose it.
#[derive(Debug)]
pub struct BatchFailure {
    pub error: BatchError,
    /// Attempts consumed by the failing request (the per-image request's
    /// count when the failure happened in degraded mode).
    pub attempts: u32,
    /// Wall-clock time from staging to failure.
    pub elapsed_ms: u64,
}

/// Internal failure carrier for the attempt loop; `submit` adds timing.
struct DriveError {
    error: BatchError,
    attempts: u32,
}

/// Submits batches to a [`VisionApi`] with retry, backoff, and payload
/// degradation. Stateless across calls: the attempt counter lives and dies
/// with one batch's submission.
pub struct ExtractionClient {
    api: Arc<dyn VisionApi>,
    config: ExtractionConfig,
}

impl ExtractionClient {
    pub fn new(api: Arc<dyn VisionApi>, config: ExtractionConfig) -> Self {
        Self { api, config }
    }

    /// Drive one batch to a terminal state.
    ///
    /// The staged payload buffers are scoped to this call and released on
    /// every exit path — success, degradation, failure, or cancellation.
    pub async fn submit(
        &self,
        batch: &Batch<'_>,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome, BatchFailure> {
        let start = Instant::now();
        let staged: Vec<StagedImage> = batch.pages.iter().map(|p| StagedImage::from_page(p)).collect();

        debug!(
            "Batch {}: submitting {} pages, {} bytes staged",
            batch.batch_index,
            staged.len(),
            batch.total_size
        );

        match self.drive(batch.batch_index, &staged, true, cancel).await {
            Ok((contacts, attempts, degraded)) => Ok(BatchOutcome {
                contacts,
                attempts,
                degraded,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
            Err(f) => Err(BatchFailure {
                error: f.error,
                attempts: f.attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }

    /// The attempt/backoff loop for one request payload.
    ///
    /// `allow_degrade` is true only for the batch-level request; the
    /// per-image resubmissions it spawns cannot degrade further.
    async fn drive(
        &self,
        batch_index: usize,
        images: &[StagedImage],
        allow_degrade: bool,
        cancel: &CancelToken,
    ) -> Result<(Vec<ContactRecord>, u32, bool), DriveError> {
        let max_attempts = self.config.backoff_max_attempts;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.backoff_delay(attempt);
                warn!(
                    "Batch {}: retry {}/{} after {}ms",
                    batch_index,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                );
                if cancel.is_cancelled() {
                    return Err(DriveError {
                        error: BatchError::Cancelled { batch_index },
                        attempts: attempt - 1,
                    });
                }
                sleep(delay).await;
            }

            match self.api.extract(images, self.config.prompt()).await {
                ApiReply::Success(body) => {
                    let contacts = match parse_contacts(&body) {
                        Ok(contacts) => contacts,
                        Err(detail) => {
                            return Err(DriveError {
                                error: BatchError::Parse { batch_index, detail },
                                attempts: attempt,
                            })
                        }
                    };
                    debug!(
                        "Batch {}: {} contacts on attempt {}",
                        batch_index,
                        contacts.len(),
                        attempt
                    );
                    return Ok((contacts, attempt, false));
                }
                reply @ (ApiReply::RateLimited | ApiReply::Overloaded | ApiReply::TimedOut) => {
                    warn!(
                        "Batch {}: attempt {} hit transient {:?}",
                        batch_index, attempt, reply
                    );
                    // fall through to the next attempt
                }
                ApiReply::PayloadTooLarge => {
                    if allow_degrade && images.len() > 1 {
                        warn!(
                            "Batch {}: payload rejected, degrading to {} per-image requests",
                            batch_index,
                            images.len()
                        );
                        let contacts = self.degrade(batch_index, images, cancel).await?;
                        return Ok((contacts, attempt, true));
                    }
                    let img = &images[0];
                    return Err(DriveError {
                        error: BatchError::ImageTooLarge {
                            page_index: img.page_index,
                            byte_size: img.byte_size,
                        },
                        attempts: attempt,
                    });
                }
                ApiReply::Failed { status, detail } => {
                    return Err(DriveError {
                        error: BatchError::Api {
                            batch_index,
                            status,
                            detail,
                        },
                        attempts: attempt,
                    });
                }
            }
        }

        Err(DriveError {
            error: BatchError::RateLimitExhausted {
                batch_index,
                attempts: max_attempts,
            },
            attempts: max_attempts,
        })
    }

    /// Per-image fallback after a batch-level 413. Images are submitted
    /// sequentially, in page order, with a fixed delay between them; results
    /// are concatenated in the same order. Any per-image failure fails the
    /// whole batch so the merger's partition invariant holds.
    async fn degrade(
        &self,
        batch_index: usize,
        images: &[StagedImage],
        cancel: &CancelToken,
    ) -> Result<Vec<ContactRecord>, DriveError> {
        let mut all: Vec<ContactRecord> = Vec::new();

        for (i, image) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DriveError {
                    error: BatchError::Cancelled { batch_index },
                    attempts: 0,
                });
            }
            if i > 0 {
                sleep(Duration::from_millis(self.config.degraded_image_delay_ms)).await;
            }

            // Indirect recursion into the attempt loop; boxed to keep the
            // future sized. Degradation is off for single images.
            let (contacts, _, _) = Box::pin(self.drive(
                batch_index,
                std::slice::from_ref(image),
                false,
                cancel,
            ))
            .await?;

            debug!(
                "Batch {}: degraded page {} yielded {} contacts",
                batch_index,
                image.page_index,
                contacts.len()
            );
            all.extend(contacts);
        }

        Ok(all)
    }

    /// Delay before attempt `n` (n ≥ 2): `base * 2^(n-2)`, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        let ms = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_max_delay_ms);
        Duration::from_millis(ms)
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

/// Parse the model's answer into contact records.
///
/// Strict on structure (the answer must be a JSON array of objects) but
/// tolerant of the two wrappers vision models actually emit: markdown code
/// fences around the array, and stray prose before/after it.
fn parse_contacts(body: &str) -> Result<Vec<ContactRecord>, String> {
    let trimmed = strip_fences(body.trim());

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            // Recover the outermost bracketed span, if any.
            let start = trimmed.find('[');
            let end = trimmed.rfind(']');
            match (start, end) {
                (Some(s), Some(e)) if s < e => serde_json::from_str(&trimmed[s..=e])
                    .map_err(|e| format!("invalid JSON: {e}"))?,
                _ => return Err("no JSON array found in response".to_string()),
            }
        }
    };

    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|v| {
                ContactRecord::from_value(v)
                    .ok_or_else(|| "array element is not an object".to_string())
            })
            .collect(),
        other => Err(format!(
            "expected JSON array, got {}",
            json_type_name(&other)
        )),
    }
}

/// Strip a surrounding markdown code fence, if present.
fn strip_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Truncate an error body to at most `max` bytes without splitting a UTF-8
/// character. Error bodies are arbitrary provider text, so the cut must land
/// on a char boundary.
fn clip_detail(detail: &mut String, max: usize) {
    if detail.len() <= max {
        return;
    }
    let mut cut = max;
    while !detail.is_char_boundary(cut) {
        cut -= 1;
    }
    detail.truncate(cut);
    detail.push('…');
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── HTTP transport ───────────────────────────────────────────────────────

/// Live transport: one POST per call to an Anthropic-style messages
/// endpoint, images as base64 blocks followed by the instruction text.
pub struct HttpVisionApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl HttpVisionApi {
    /// Build the transport from config, resolving the API key from the
    /// config value, then `DEEDSCAN_API_KEY`, then `ANTHROPIC_API_KEY`.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, DeedscanError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("DEEDSCAN_API_KEY").ok().filter(|s| !s.is_empty()))
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok().filter(|s| !s.is_empty()))
            .ok_or(DeedscanError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeedscanError::HttpClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_response_tokens,
        })
    }

    /// Pull the concatenated text blocks out of a 200 response envelope.
    fn response_text(body: &str) -> Option<String> {
        let envelope: Value = serde_json::from_str(body).ok()?;
        let blocks = envelope.get("content")?.as_array()?;
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl VisionApi for HttpVisionApi {
    async fn extract(&self, images: &[StagedImage], prompt: &str) -> ApiReply {
        let mut content: Vec<Value> = images
            .iter()
            .map(|img| {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": img.media_type,
                        "data": img.data,
                    }
                })
            })
            .collect();
        content.push(json!({ "type": "text", "text": prompt }));

        let request = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = match self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return ApiReply::TimedOut,
            Err(e) => {
                return ApiReply::Failed {
                    status: e.status().map(|s| s.as_u16()),
                    detail: e.to_string(),
                }
            }
        };

        // 529 is provider-specific, so statuses are matched numerically.
        match response.status().as_u16() {
            200 => {
                let body = match response.text().await {
                    Ok(b) => b,
                    Err(e) if e.is_timeout() => return ApiReply::TimedOut,
                    Err(e) => {
                        return ApiReply::Failed {
                            status: Some(200),
                            detail: format!("reading response body: {e}"),
                        }
                    }
                };
                match Self::response_text(&body) {
                    Some(text) => ApiReply::Success(text),
                    None => ApiReply::Failed {
                        status: Some(200),
                        detail: "response envelope has no text content".to_string(),
                    },
                }
            }
            429 => ApiReply::RateLimited,
            529 => ApiReply::Overloaded,
            413 => ApiReply::PayloadTooLarge,
            status => {
                let mut detail = response.text().await.unwrap_or_default();
                clip_detail(&mut detail, 300);
                ApiReply::Failed {
                    status: Some(status),
                    detail,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_config(base_ms: u64, attempts: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .backoff_base_ms(base_ms)
            .backoff_max_delay_ms(60_000)
            .backoff_max_attempts(attempts)
            .degraded_image_delay_ms(10)
            .build()
            .expect("valid test config")
    }

    fn pages(n: usize) -> Vec<PageImage> {
        (0..n)
            .map(|i| PageImage::new(i, vec![i as u8; 100], 50, 50))
            .collect()
    }

    /// Replays a fixed reply sequence regardless of payload.
    struct ScriptedApi {
        replies: Mutex<VecDeque<ApiReply>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(replies: Vec<ApiReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionApi for ScriptedApi {
        async fn extract(&self, _images: &[StagedImage], _prompt: &str) -> ApiReply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ApiReply::Failed {
                    status: None,
                    detail: "script exhausted".into(),
                })
        }
    }

    /// Rejects multi-image payloads with 413; answers single images with a
    /// one-record array naming the page.
    struct SplitApi;

    #[async_trait]
    impl VisionApi for SplitApi {
        async fn extract(&self, images: &[StagedImage], _prompt: &str) -> ApiReply {
            if images.len() > 1 {
                ApiReply::PayloadTooLarge
            } else {
                let idx = images[0].page_index;
                ApiReply::Success(format!(
                    r#"[{{"name": "Owner {idx}", "address": "{idx} Oak St"}}]"#
                ))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_exponential_delays() {
        let api = ScriptedApi::new(vec![
            ApiReply::RateLimited,
            ApiReply::RateLimited,
            ApiReply::Success(r#"[{"name": "A", "address": "1"}]"#.into()),
        ]);
        let client = ExtractionClient::new(api.clone(), test_config(100, 5));
        let imgs = pages(2);
        let batches = plan(&imgs, usize::MAX);

        let start = tokio::time::Instant::now();
        let outcome = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.degraded);
        assert_eq!(outcome.contacts.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);

        // base + 2*base of virtual time, nothing more.
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(300) && waited < Duration::from_millis(330),
            "expected ~300ms of backoff, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_429_exhausts_attempts() {
        let api = ScriptedApi::new(vec![ApiReply::RateLimited; 10]);
        let client = ExtractionClient::new(api.clone(), test_config(10, 5));
        let imgs = pages(1);
        let batches = plan(&imgs, usize::MAX);

        let failure = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect_err("must give up");

        assert!(matches!(
            failure.error,
            BatchError::RateLimitExhausted { attempts: 5, .. }
        ));
        assert_eq!(failure.attempts, 5);
        assert_eq!(api.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn overload_and_timeout_also_consume_attempts() {
        let api = ScriptedApi::new(vec![
            ApiReply::Overloaded,
            ApiReply::TimedOut,
            ApiReply::Success("[]".into()),
        ]);
        let client = ExtractionClient::new(api, test_config(10, 5));
        let imgs = pages(1);
        let batches = plan(&imgs, usize::MAX);

        let outcome = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect("succeeds after transients");
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.contacts.is_empty());
    }

    #[tokio::test]
    async fn non_array_body_is_terminal_parse_error() {
        let api = ScriptedApi::new(vec![
            ApiReply::Success(r#"{"not": "an array"}"#.into()),
            // Would succeed if (incorrectly) retried:
            ApiReply::Success("[]".into()),
        ]);
        let client = ExtractionClient::new(api.clone(), test_config(1, 5));
        let imgs = pages(1);
        let batches = plan(&imgs, usize::MAX);

        let failure = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect_err("malformed output is not retried");
        assert!(matches!(failure.error, BatchError::Parse { .. }));
        assert_eq!(failure.attempts, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_status_fails_immediately() {
        let api = ScriptedApi::new(vec![ApiReply::Failed {
            status: Some(500),
            detail: "boom".into(),
        }]);
        let client = ExtractionClient::new(api.clone(), test_config(1, 5));
        let imgs = pages(1);
        let batches = plan(&imgs, usize::MAX);

        let failure = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect_err("hard failure");
        assert!(matches!(failure.error, BatchError::Api { status: Some(500), .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_image_413_degrades_in_page_order() {
        let client = ExtractionClient::new(Arc::new(SplitApi), test_config(10, 5));
        let imgs = pages(3);
        let batches = plan(&imgs, usize::MAX);
        assert_eq!(batches.len(), 1);

        let outcome = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect("degradation recovers the batch");

        assert!(outcome.degraded);
        let names: Vec<_> = outcome
            .contacts
            .iter()
            .map(|c| c.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Owner 0", "Owner 1", "Owner 2"]);
    }

    #[tokio::test]
    async fn singleton_413_is_terminal() {
        let api = ScriptedApi::new(vec![ApiReply::PayloadTooLarge]);
        let client = ExtractionClient::new(api.clone(), test_config(1, 5));
        let imgs = pages(1);
        let batches = plan(&imgs, usize::MAX);

        let failure = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect_err("cannot split a single image");
        assert!(matches!(
            failure.error,
            BatchError::ImageTooLarge { page_index: 0, .. }
        ));
        // No retry of a deterministic rejection.
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_image_413_fails_the_batch() {
        // Batch of 2 → 413; page 0 → ok; page 1 → 413 again.
        struct Api;
        #[async_trait]
        impl VisionApi for Api {
            async fn extract(&self, images: &[StagedImage], _p: &str) -> ApiReply {
                if images.len() > 1 || images[0].page_index == 1 {
                    ApiReply::PayloadTooLarge
                } else {
                    ApiReply::Success("[]".into())
                }
            }
        }
        let client = ExtractionClient::new(Arc::new(Api), test_config(10, 5));
        let imgs = pages(2);
        let batches = plan(&imgs, usize::MAX);

        let failure = client
            .submit(&batches[0], &CancelToken::new())
            .await
            .expect_err("oversized page fails the batch");
        assert!(matches!(
            failure.error,
            BatchError::ImageTooLarge { page_index: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_short_circuits_backoff() {
        let api = ScriptedApi::new(vec![ApiReply::RateLimited; 10]);
        let client = ExtractionClient::new(api.clone(), test_config(10, 5));
        let imgs = pages(1);
        let batches = plan(&imgs, usize::MAX);

        let cancel = CancelToken::new();
        cancel.cancel();
        let failure = client
            .submit(&batches[0], &cancel)
            .await
            .expect_err("cancelled before second attempt");
        assert!(matches!(failure.error, BatchError::Cancelled { .. }));
        assert_eq!(failure.attempts, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    // ── parse_contacts ───────────────────────────────────────────────────

    #[test]
    fn parse_plain_array() {
        let contacts =
            parse_contacts(r#"[{"name": "A"}, {"name": "B"}]"#).expect("valid array");
        assert_eq!(contacts.len(), 2);
    }

    #[test]
    fn parse_empty_array() {
        assert!(parse_contacts("[]").expect("empty is valid").is_empty());
    }

    #[test]
    fn parse_fenced_array() {
        let body = "```json\n[{\"name\": \"A\"}]\n```";
        let contacts = parse_contacts(body).expect("fences stripped");
        assert_eq!(contacts.len(), 1);
    }

    #[test]
    fn parse_array_with_surrounding_prose() {
        let body = "Here are the records I found:\n[{\"name\": \"A\"}]\nLet me know!";
        let contacts = parse_contacts(body).expect("prose tolerated");
        assert_eq!(contacts.len(), 1);
    }

    #[test]
    fn parse_rejects_object_body() {
        let err = parse_contacts(r#"{"contacts": []}"#).expect_err("not an array");
        assert!(err.contains("array"), "got: {err}");
    }

    #[test]
    fn parse_rejects_scalar_elements() {
        assert!(parse_contacts(r#"["just a string"]"#).is_err());
    }

    #[test]
    fn parse_rejects_prose_only() {
        assert!(parse_contacts("No records found on these pages.").is_err());
    }

    // ── clip_detail ──────────────────────────────────────────────────────

    #[test]
    fn clip_detail_leaves_short_bodies_alone() {
        let mut detail = "bad request".to_string();
        clip_detail(&mut detail, 300);
        assert_eq!(detail, "bad request");
    }

    #[test]
    fn clip_detail_backs_off_to_a_char_boundary() {
        // A multibyte char straddling the cut must not panic the clip.
        let mut detail = "a".repeat(299);
        detail.push('€');
        clip_detail(&mut detail, 300);
        assert!(detail.ends_with('…'));
        assert_eq!(detail.chars().filter(|&c| c == 'a').count(), 299);
    }

    #[test]
    fn clip_detail_handles_fully_multibyte_bodies() {
        let mut detail = "函".repeat(200); // 600 bytes
        clip_detail(&mut detail, 300);
        assert!(detail.len() <= 300 + '…'.len_utf8());
        assert!(detail.ends_with('…'));
    }
}
