//! Generation with retry: send the instruction plus the ingested asset and
//! turn the answer into a file name.
//!
//! ## Retry Strategy
//!
//! Every failed attempt is classified. Rate limits, quota exhaustion,
//! "service busy" and timeouts are transient and retried up to
//! `retry.max_attempts`; anything else (bad asset, revoked key, content
//! policy) ends the document on the spot. Between attempts the client waits
//! the server's suggested delay when one is given, capped at the backoff
//! ceiling, otherwise the configured [`Backoff`](crate::config::Backoff)
//! step. Waits report remaining time once per second and end early on
//! cancellation.
//!
//! The successful answer goes through [`NameSanitizer`] before returning; a
//! name it rejects fails the document without further attempts.

use crate::backend::{
    Credential, GenerationInput, GenerationOptions, InferenceBackend, ModelDescriptor,
};
use crate::config::{RenameConfig, RetryPolicy};
use crate::error::DocumentError;
use crate::pipeline::sanitize::NameSanitizer;
use crate::pipeline::wait::{run_or_cancel, wait_or_cancel, Cancelled};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::DEFAULT_INSTRUCTION;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classification of one generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    TransientFailure,
    FatalFailure,
}

/// Record of one attempt; the history of these drives the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub document_id: String,
    /// 1-based.
    pub attempt: u32,
    pub status: AttemptStatus,
    pub raw_text: Option<String>,
    pub error_detail: Option<String>,
}

/// A sanitised file name plus the attempts it took.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub file_name: String,
    pub attempts: u32,
    pub history: Vec<ExtractionOutcome>,
}

/// Extraction error together with the attempts spent before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub error: DocumentError,
    pub attempts: u32,
}

impl ExtractionFailure {
    fn new(error: DocumentError, attempts: u32) -> Self {
        Self { error, attempts }
    }
}

/// A failure before any generation attempt (ingestion, format checks).
impl From<DocumentError> for ExtractionFailure {
    fn from(error: DocumentError) -> Self {
        Self::new(error, 0)
    }
}

/// Sends generation requests for one run's resolved model.
pub struct ResilientInferenceClient {
    backend: Arc<dyn InferenceBackend>,
    credential: Credential,
    model: ModelDescriptor,
    instruction: String,
    options: GenerationOptions,
    retry: RetryPolicy,
    sanitizer: NameSanitizer,
    progress: ProgressCallback,
    cancel: CancellationToken,
}

impl ResilientInferenceClient {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        credential: Credential,
        model: ModelDescriptor,
        config: &RenameConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            credential,
            model,
            instruction: config
                .instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            options: GenerationOptions {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            },
            retry: config.retry,
            sanitizer: NameSanitizer::default(),
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            cancel,
        }
    }

    /// Run the attempt loop for one document and return its new name.
    pub async fn extract(
        &self,
        index: usize,
        document_id: &str,
        input: &GenerationInput,
    ) -> Result<Extraction, ExtractionFailure> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut history: Vec<ExtractionOutcome> = Vec::with_capacity(max_attempts as usize);
        let cancelled =
            |attempts: u32| ExtractionFailure::new(DocumentError::from(Cancelled), attempts);

        for attempt in 1..=max_attempts {
            let call = self
                .backend
                .generate(&self.credential, &self.model, input, &self.instruction, &self.options);
            let answer = run_or_cancel(call, &self.cancel)
                .await
                .map_err(|_| cancelled(attempt - 1))?;

            let err = match answer {
                Ok(text) => {
                    debug!("{}: attempt {} answered {:?}", document_id, attempt, text);
                    history.push(ExtractionOutcome {
                        document_id: document_id.to_string(),
                        attempt,
                        status: AttemptStatus::Success,
                        raw_text: Some(text.clone()),
                        error_detail: None,
                    });
                    let file_name = self
                        .sanitizer
                        .sanitize(&text)
                        .map_err(|e| ExtractionFailure::new(e, attempt))?;
                    return Ok(Extraction {
                        file_name,
                        attempts: attempt,
                        history,
                    });
                }
                Err(err) => err,
            };

            let transient = err.is_transient();
            history.push(ExtractionOutcome {
                document_id: document_id.to_string(),
                attempt,
                status: if transient {
                    AttemptStatus::TransientFailure
                } else {
                    AttemptStatus::FatalFailure
                },
                raw_text: None,
                error_detail: Some(err.to_string()),
            });

            if !transient {
                warn!("{}: attempt {} failed, not retrying: {}", document_id, attempt, err);
                return Err(ExtractionFailure::new(
                    DocumentError::ExtractionRejected {
                        attempts: attempt,
                        detail: err.to_string(),
                    },
                    attempt,
                ));
            }
            if attempt == max_attempts {
                break;
            }

            let wait = err
                .retry_after()
                .map(|d| d.min(self.retry.backoff.ceiling()))
                .unwrap_or_else(|| self.retry.backoff.delay(attempt));
            warn!(
                "{}: attempt {}/{} hit a busy backend ({}), retrying in {}s",
                document_id,
                attempt,
                max_attempts,
                err,
                wait.as_secs()
            );
            wait_or_cancel(wait, &self.cancel, |left| {
                self.progress.on_retry_wait(index, attempt, left)
            })
            .await
            .map_err(|_| cancelled(attempt))?;
        }

        let detail = history
            .last()
            .and_then(|o| o.error_detail.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(ExtractionFailure::new(
            DocumentError::RetriesExhausted {
                attempts: max_attempts,
                detail,
            },
            max_attempts,
        ))
    }
}
