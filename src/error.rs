//! Error types for the pdf-autoname library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the batch cannot proceed at all (the
//!   credential was rejected, the configuration is invalid, an input file
//!   could not be read). Returned as `Err(PipelineError)` from the top-level
//!   `rename_*` functions before any document is processed.
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (the backend
//!   rejected its asset, retries ran out, the model produced an unusable name)
//!   but every other document is unaffected. Stored inside
//!   [`crate::output::ProcessingResult`] so a batch always reports one entry
//!   per submitted document.
//!
//! Errors raised at the backend boundary use [`crate::backend::BackendError`]
//! and are folded into one of the two types above by the pipeline stages.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-autoname library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::ProcessingResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Credential errors ─────────────────────────────────────────────────
    /// The credential is missing, invalid, or cannot reach any usable model.
    #[error("Authentication failed for backend '{backend}': {detail}")]
    AuthError { backend: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The bulk archive could not be assembled.
    #[error("Failed to build archive: {0}")]
    ArchiveFailed(String),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
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

/// A non-fatal error for a single document.
///
/// Stored in [`crate::output::ProcessingResult::error`]. The batch continues
/// with the remaining documents regardless of which variant occurred.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The document bytes are not a PDF.
    #[error("unsupported format (first bytes {magic:?}), expected a PDF")]
    UnsupportedFormat { magic: Vec<u8> },

    /// Upload failed or the backend marked the asset as failed.
    #[error("ingestion failed: {detail}")]
    IngestFailed { detail: String },

    /// The asset never became usable within the configured wait.
    #[error("asset '{remote_id}' was not ready after {waited_secs}s")]
    IngestTimeout { remote_id: String, waited_secs: u64 },

    /// First-page rasterisation failed under the snapshot strategy.
    #[error("snapshot rendering failed: {detail}")]
    SnapshotFailed { detail: String },

    /// Every attempt hit a transient backend condition.
    #[error("backend still busy after {attempts} attempts: {detail}")]
    RetriesExhausted { attempts: u32, detail: String },

    /// The backend rejected the request for a non-retryable reason.
    #[error("extraction failed on attempt {attempts}: {detail}")]
    ExtractionRejected { attempts: u32, detail: String },

    /// The model answered, but the answer is not a usable file name.
    #[error("model returned an unusable name ({reason}): {raw:?}")]
    InvalidName { raw: String, reason: String },

    /// The run was cancelled before this document finished.
    #[error("cancelled")]
    Cancelled,
}

impl DocumentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DocumentError::Cancelled)
    }
}
