//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across runs, log them, and diff two
//! runs to understand why their outcomes differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest. No field is mandatory.

use crate::error::DeedscanError;
use crate::progress::ProgressCallback;
use std::fmt;

/// Hard payload ceiling per request batch: 8 MiB.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 8 * 1024 * 1024;

/// Configuration for a batch-extraction pipeline run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use deedscan::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_batch_bytes(4 * 1024 * 1024)
///     .backoff_max_attempts(3)
///     .source_file("deed_0142.pdf")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum cumulative encoded byte size per batch. Default: 8 MiB.
    ///
    /// This is the engine's own ceiling, set below the provider's request
    /// limit so base64 expansion (~33 %) and the JSON envelope never push a
    /// compliant batch over the wire limit. A single page larger than this
    /// still travels as an oversized singleton — it cannot be split, and the
    /// degradation path owns the resulting 413.
    pub max_batch_bytes: usize,

    /// Delay between successive batch submissions in milliseconds. Default: 2000.
    ///
    /// Proactive throttling, independent of the reactive backoff: the
    /// extraction API is rate limited per account, and spacing batches out
    /// avoids burning retry attempts on 429s we can predict.
    pub inter_batch_delay_ms: u64,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 1500.
    ///
    /// Doubles after each transient failure: 1.5 s → 3 s → 6 s → 12 s.
    /// Exponential growth avoids hammering a provider that is already
    /// shedding load.
    pub backoff_base_ms: u64,

    /// Cap on a single backoff delay in milliseconds. Default: 30_000.
    pub backoff_max_delay_ms: u64,

    /// Maximum submission attempts per batch (or per image in degraded
    /// mode). Default: 5.
    ///
    /// Counts the first attempt: 5 means one submission plus four retries.
    /// Only 429/529/timeout consume attempts; other errors fail immediately.
    pub backoff_max_attempts: u32,

    /// Delay between per-image submissions inside the degradation path, in
    /// milliseconds. Default: 500.
    pub degraded_image_delay_ms: u64,

    /// Per-request timeout in seconds. Default: 90.
    ///
    /// Multi-image vision requests routinely take 30–60 s; a timeout is
    /// treated as transient and retried under the same backoff as 429/529.
    pub request_timeout_secs: u64,

    /// Extraction API endpoint.
    pub api_url: String,

    /// API key. Falls back to `DEEDSCAN_API_KEY` then `ANTHROPIC_API_KEY`
    /// from the environment when unset.
    pub api_key: Option<String>,

    /// Vision model identifier.
    pub model: String,

    /// Maximum tokens the model may generate per response. Default: 8192.
    ///
    /// A dense ownership table can yield hundreds of records; truncation
    /// mid-array shows up as a parse failure, so this stays generous.
    pub max_response_tokens: u32,

    /// Custom extraction instruction. If None, uses
    /// [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub extraction_prompt: Option<String>,

    /// Label stamped into each record's `source_file` provenance field.
    /// Typically the originating PDF's file name.
    pub source_file: Option<String>,

    /// Optional per-batch progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            inter_batch_delay_ms: 2000,
            backoff_base_ms: 1500,
            backoff_max_delay_ms: 30_000,
            backoff_max_attempts: 5,
            degraded_image_delay_ms: 500,
            request_timeout_secs: 90,
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_response_tokens: 8192,
            extraction_prompt: None,
            source_file: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("inter_batch_delay_ms", &self.inter_batch_delay_ms)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_max_delay_ms", &self.backoff_max_delay_ms)
            .field("backoff_max_attempts", &self.backoff_max_attempts)
            .field("degraded_image_delay_ms", &self.degraded_image_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("source_file", &self.source_file)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The instruction payload to send, honouring any override.
    pub fn prompt(&self) -> &str {
        self.extraction_prompt
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_EXTRACTION_PROMPT)
    }

    /// The `source_file` provenance label, or `"unknown"` when unset.
    pub fn source_label(&self) -> &str {
        self.source_file.as_deref().unwrap_or("unknown")
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    pub fn inter_batch_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_batch_delay_ms = ms;
        self
    }

    pub fn backoff_base_ms(mut self, ms: u64) -> Self {
        self.config.backoff_base_ms = ms;
        self
    }

    pub fn backoff_max_delay_ms(mut self, ms: u64) -> Self {
        self.config.backoff_max_delay_ms = ms;
        self
    }

    pub fn backoff_max_attempts(mut self, n: u32) -> Self {
        self.config.backoff_max_attempts = n.max(1);
        self
    }

    pub fn degraded_image_delay_ms(mut self, ms: u64) -> Self {
        self.config.degraded_image_delay_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_response_tokens(mut self, n: u32) -> Self {
        self.config.max_response_tokens = n;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn source_file(mut self, name: impl Into<String>) -> Self {
        self.config.source_file = Some(name.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DeedscanError> {
        let c = &self.config;
        if c.max_batch_bytes == 0 {
            return Err(DeedscanError::InvalidConfig(
                "max_batch_bytes must be ≥ 1".into(),
            ));
        }
        if c.backoff_max_attempts == 0 {
            return Err(DeedscanError::InvalidConfig(
                "backoff_max_attempts must be ≥ 1".into(),
            ));
        }
        if c.backoff_base_ms > c.backoff_max_delay_ms {
            return Err(DeedscanError::InvalidConfig(format!(
                "backoff_base_ms ({}) exceeds backoff_max_delay_ms ({})",
                c.backoff_base_ms, c.backoff_max_delay_ms
            )));
        }
        if c.api_url.is_empty() {
            return Err(DeedscanError::InvalidConfig("api_url must not be empty".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.max_batch_bytes, 8 * 1024 * 1024);
        assert_eq!(c.inter_batch_delay_ms, 2000);
        assert_eq!(c.backoff_base_ms, 1500);
        assert_eq!(c.backoff_max_attempts, 5);
        assert_eq!(c.request_timeout_secs, 90);
    }

    #[test]
    fn builder_sets_fields() {
        let c = ExtractionConfig::builder()
            .max_batch_bytes(1024)
            .backoff_max_attempts(2)
            .source_file("deed.pdf")
            .build()
            .expect("valid config");
        assert_eq!(c.max_batch_bytes, 1024);
        assert_eq!(c.backoff_max_attempts, 2);
        assert_eq!(c.source_label(), "deed.pdf");
    }

    #[test]
    fn zero_attempts_is_clamped_by_setter() {
        let c = ExtractionConfig::builder()
            .backoff_max_attempts(0)
            .build()
            .expect("setter clamps to 1");
        assert_eq!(c.backoff_max_attempts, 1);
    }

    #[test]
    fn base_above_cap_is_rejected() {
        let err = ExtractionConfig::builder()
            .backoff_base_ms(60_000)
            .backoff_max_delay_ms(1_000)
            .build()
            .expect_err("base > cap must fail validation");
        assert!(matches!(err, DeedscanError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractionConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn source_label_falls_back_to_unknown() {
        assert_eq!(ExtractionConfig::default().source_label(), "unknown");
    }
}
