//! Configuration types for batch renaming.
//!
//! All pipeline behaviour is controlled through [`RenameConfig`], built via
//! its [`RenameConfigBuilder`]. The config is cheap to clone and is shared
//! read-only by every document task of a run.

use crate::backend::InferenceBackend;
use crate::error::PipelineError;
use crate::progress::BatchProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a renaming run.
///
/// Built via [`RenameConfig::builder()`] or using [`RenameConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_autoname::{IngestStrategy, RenameConfig};
///
/// let config = RenameConfig::builder()
///     .strategy(IngestStrategy::TruncatedSample { pages: 2 })
///     .concurrency(4)
///     .max_attempts(5)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RenameConfig {
    /// How each document is turned into something the backend can read.
    /// Default: [`IngestStrategy::DirectUpload`].
    pub strategy: IngestStrategy,

    /// Documents processed at the same time. Default: 1 (strictly sequential).
    ///
    /// Every in-flight document can issue generation calls, so raising this
    /// multiplies pressure on the backend's rate limit.
    pub concurrency: usize,

    /// Retry bound and wait schedule for transient backend failures.
    pub retry: RetryPolicy,

    /// Delay between readiness polls of an uploaded asset. Default: 3 s.
    pub poll_interval: Duration,

    /// Longest time to wait for an uploaded asset to become usable. Default: 5 min.
    pub max_ingest_wait: Duration,

    /// Which listed model to pick and what to do when listing is unhelpful.
    pub model_policy: ModelPolicy,

    /// Explicit model name. When set, model enumeration is skipped.
    pub model: Option<String>,

    /// Longest edge of the first-page snapshot in pixels. Default: 1600.
    pub snapshot_max_pixels: u32,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Output token cap for the generated name. Default: 256.
    pub max_output_tokens: u32,

    /// Per-HTTP-call timeout in seconds for the default backend. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom extraction instruction. If None, uses the built-in naming grammar.
    pub instruction: Option<String>,

    /// Delete uploaded assets once a document is finished. Default: true.
    pub release_assets: bool,

    /// Collect renamed originals into a zip archive. Default: false.
    pub build_archive: bool,

    /// Also archive failed documents under an `ERROR_` name. Default: false.
    pub keep_failed_in_archive: bool,

    /// Pre-constructed backend. If None, the Gemini REST backend is used.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Receives per-document progress events.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            strategy: IngestStrategy::default(),
            concurrency: 1,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(3),
            max_ingest_wait: Duration::from_secs(300),
            model_policy: ModelPolicy::default(),
            model: None,
            snapshot_max_pixels: 1600,
            temperature: 0.1,
            max_output_tokens: 256,
            api_timeout_secs: 120,
            instruction: None,
            release_assets: true,
            build_archive: false,
            keep_failed_in_archive: false,
            backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenameConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenameConfig")
            .field("strategy", &self.strategy)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("poll_interval", &self.poll_interval)
            .field("max_ingest_wait", &self.max_ingest_wait)
            .field("model_policy", &self.model_policy)
            .field("model", &self.model)
            .field("snapshot_max_pixels", &self.snapshot_max_pixels)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("release_assets", &self.release_assets)
            .field("build_archive", &self.build_archive)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

impl RenameConfig {
    /// Create a new builder for `RenameConfig`.
    pub fn builder() -> RenameConfigBuilder {
        RenameConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RenameConfig`].
#[derive(Debug)]
pub struct RenameConfigBuilder {
    config: RenameConfig,
}

impl RenameConfigBuilder {
    pub fn strategy(mut self, strategy: IngestStrategy) -> Self {
        self.config.strategy = strategy.normalised();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_ingest_wait(mut self, wait: Duration) -> Self {
        self.config.max_ingest_wait = wait;
        self
    }

    pub fn model_policy(mut self, policy: ModelPolicy) -> Self {
        self.config.model_policy = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn snapshot_max_pixels(mut self, px: u32) -> Self {
        self.config.snapshot_max_pixels = px.max(100);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    pub fn release_assets(mut self, v: bool) -> Self {
        self.config.release_assets = v;
        self
    }

    pub fn build_archive(mut self, v: bool) -> Self {
        self.config.build_archive = v;
        self
    }

    pub fn keep_failed_in_archive(mut self, v: bool) -> Self {
        self.config.keep_failed_in_archive = v;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenameConfig, PipelineError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll_interval must be non-zero".into(),
            ));
        }
        if c.max_ingest_wait < c.poll_interval {
            return Err(PipelineError::InvalidConfig(format!(
                "max_ingest_wait ({:?}) is shorter than poll_interval ({:?})",
                c.max_ingest_wait, c.poll_interval
            )));
        }
        if c.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(PipelineError::InvalidConfig("model must not be blank".into()));
        }
        Ok(self.config)
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

/// How a document becomes something the backend can analyse.
///
/// | Strategy | Sent | Polls? | When it cannot prepare the payload |
/// |----------|------|--------|------------------------------------|
/// | `DirectUpload` | the full original bytes | yes | — |
/// | `TruncatedSample` | the first `pages` pages as a new PDF | yes | uploads the original instead |
/// | `Snapshot` | first page rendered to PNG, inline | no | document fails |
/// | `TextExcerpt` | first page text layer, inline | no | sends a "text unreadable" note |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IngestStrategy {
    /// Upload the document untouched. Required when the bytes must not be
    /// altered (e.g. digitally signed PDFs). (default)
    #[default]
    DirectUpload,
    /// Upload only the leading pages to bound payload size and ingestion time.
    TruncatedSample { pages: u16 },
    /// Rasterise page one and send the image instead of the PDF.
    Snapshot,
    /// Send the first page's text layer, truncated to `max_chars`.
    TextExcerpt { max_chars: usize },
}

impl IngestStrategy {
    pub const DEFAULT_SAMPLE_PAGES: u16 = 3;
    pub const DEFAULT_EXCERPT_CHARS: usize = 3000;

    fn normalised(self) -> Self {
        match self {
            IngestStrategy::TruncatedSample { pages } => IngestStrategy::TruncatedSample {
                pages: pages.clamp(1, 10),
            },
            IngestStrategy::TextExcerpt { max_chars } => IngestStrategy::TextExcerpt {
                max_chars: max_chars.max(100),
            },
            other => other,
        }
    }

    /// Whether preparing the payload goes through pdfium.
    pub fn needs_pdfium(&self) -> bool {
        !matches!(self, IngestStrategy::DirectUpload)
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Retry bound and waits for transient generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total generation attempts per document, including the first. Default: 4.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Backoff::default(),
        }
    }
}

/// Wait schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same wait before every retry.
    Fixed(Duration),
    /// `initial`, doubling per retry, never above `max`. Default: 30 s → 65 s.
    Escalating { initial: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Escalating {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(65),
        }
    }
}

impl Backoff {
    /// Wait before retry number `retry` (1 = the wait after the first failure).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Escalating { initial, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    /// Upper bound applied to server-suggested waits.
    pub fn ceiling(&self) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Escalating { max, .. } => max,
        }
    }
}

// ── Model choice ─────────────────────────────────────────────────────────

/// How the resolver picks a model from the listed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPolicy {
    /// Name fragments in priority order; the first listed generation-capable
    /// model containing the earliest fragment wins.
    pub preferred_families: Vec<String>,
    /// Static model identifier used by the two switches below.
    pub fallback: Option<String>,
    /// Use `fallback` when listing succeeds but offers nothing usable (some
    /// keys can generate but not enumerate). Default: on.
    pub fallback_on_empty: bool,
    /// Use `fallback` when listing fails for a reason other than a rejected
    /// credential (network, refused listing). Default: off, so such a failure
    /// is an `AuthError`.
    pub fallback_on_error: bool,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            preferred_families: [
                "gemini-2.5-flash",
                "gemini-2.0-flash",
                "gemini-1.5-flash",
                "flash",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            fallback: Some("models/gemini-1.5-flash".to_string()),
            fallback_on_empty: true,
            fallback_on_error: false,
        }
    }
}

impl ModelPolicy {
    /// Never fall back: an empty or failed listing is an `AuthError`.
    pub fn without_fallback(mut self) -> Self {
        self.fallback_on_empty = false;
        self.fallback_on_error = false;
        self
    }

    /// Also fall back when listing fails outright.
    pub fn with_fallback_on_error(mut self) -> Self {
        self.fallback_on_error = true;
        self
    }

    pub(crate) fn fallback_for_empty(&self) -> Option<&str> {
        self.fallback.as_deref().filter(|_| self.fallback_on_empty)
    }

    pub(crate) fn fallback_for_error(&self) -> Option<&str> {
        self.fallback.as_deref().filter(|_| self.fallback_on_error)
    }
}
