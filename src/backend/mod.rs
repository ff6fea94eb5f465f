//! The remote inference service, abstracted as the trio of capabilities the
//! pipeline depends on: list models, upload/poll assets, and generate text.
//!
//! Two implementations ship with the crate:
//!
//! * [`gemini::GeminiBackend`] — the Generative Language REST API, with real
//!   file uploads that go through server-side processing.
//! * [`provider::ProviderBackend`] — any `edgequake-llm` provider; uploads are
//!   held in memory and sent inline with the generation request.
//!
//! Tests and callers can plug in their own [`InferenceBackend`].

pub mod gemini;
pub mod provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// An opaque API credential.
///
/// `Debug` never prints the secret, so credentials can travel through
/// `tracing` spans and config dumps safely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for placing in request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A model variant the credential can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub supports_generation: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, supports_generation: bool) -> Self {
        Self {
            name: name.into(),
            supports_generation,
        }
    }
}

/// Server-side processing state of an uploaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetState {
    Pending,
    Processing,
    Active,
    Failed,
}

impl AssetState {
    /// `Active` and `Failed` end the readiness wait.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetState::Active | AssetState::Failed)
    }
}

/// A document (or a derivative of it) held by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub remote_id: String,
    pub state: AssetState,
    /// Empty when a poll response did not report it.
    pub mime_type: String,
    /// Reference used when citing the asset in a generation request.
    pub uri: Option<String>,
}

/// Bytes submitted for upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub display_name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// What a generation request carries besides the instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationInput {
    /// A previously uploaded, `Active` asset.
    Asset(RemoteAsset),
    /// Raw bytes sent with the request itself (e.g. a rendered snapshot).
    Inline { mime_type: String, bytes: Vec<u8> },
    /// Plain text appended to the instruction.
    Text(String),
}

/// Sampling knobs forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 256,
        }
    }
}

/// Failure reported at the backend boundary.
///
/// [`BackendError::is_transient`] decides whether the extraction loop retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// HTTP 429, quota exhausted, or an equivalent provider signal.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// The service reported it is overloaded or temporarily down.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The call did not answer within the configured timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The credential was rejected or lacks permission.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was refused (malformed asset, content policy, bad model).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The request never reached the service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Transient conditions are expected to clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. }
                | BackendError::Unavailable(_)
                | BackendError::Timeout(_)
        )
    }

    /// Server-suggested delay before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Classify a free-form provider error message.
    ///
    /// Third-party client crates surface errors as display strings; the
    /// status codes and status names they embed are stable enough to sort on.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&[
            "429",
            "rate limit",
            "rate_limit",
            "too many requests",
            "quota",
            "resource_exhausted",
            "resource exhausted",
        ]) {
            BackendError::RateLimited {
                message,
                retry_after_secs: None,
            }
        } else if has(&["503", "overloaded", "unavailable", "server is busy", "capacity"]) {
            BackendError::Unavailable(message)
        } else if has(&["timed out", "timeout"]) {
            BackendError::Timeout(0)
        } else if has(&[
            "401",
            "403",
            "unauthorized",
            "unauthenticated",
            "permission_denied",
            "invalid api key",
            "api key not valid",
        ]) {
            BackendError::Unauthorized(message)
        } else {
            BackendError::Rejected(message)
        }
    }
}

/// The capabilities the pipeline needs from a remote inference service.
///
/// All methods receive the credential explicitly; implementations must not
/// rely on process-wide credential state.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &str;

    /// Enumerate the model identifiers the credential may use.
    async fn list_models(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ModelDescriptor>, BackendError>;

    /// Submit bytes for server-side processing.
    async fn upload_asset(
        &self,
        credential: &Credential,
        request: UploadRequest<'_>,
    ) -> Result<RemoteAsset, BackendError>;

    /// Fetch the current state of an uploaded asset.
    async fn poll_asset(
        &self,
        credential: &Credential,
        remote_id: &str,
    ) -> Result<RemoteAsset, BackendError>;

    /// Release storage held for an asset. Backends without storage charges
    /// can keep the default no-op.
    async fn release_asset(
        &self,
        credential: &Credential,
        remote_id: &str,
    ) -> Result<(), BackendError> {
        let _ = (credential, remote_id);
        Ok(())
    }

    /// Run one content-generation request and return the raw response text.
    async fn generate(
        &self,
        credential: &Credential,
        model: &ModelDescriptor,
        input: &GenerationInput,
        instruction: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError>;
}
