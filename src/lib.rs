//! # pdf-autoname
//!
//! Rename batches of PDF documents from their content, using a remote
//! generative model to read each document and propose a structured name.
//!
//! ## Why this crate?
//!
//! Scanned administrative paperwork arrives as `scan_0001.pdf`,
//! `scan_0002.pdf`… The information needed to file it (issuance date,
//! document type, issuing number, subject) is printed on the first page.
//! This crate sends each document to a multimodal model with a fixed naming
//! grammar and turns the answer into a safe file name:
//!
//! ```text
//! <DATE8>_<DOCTYPE>_<DOCNUMBER>_<SUMMARY>_<STATUS>.pdf
//! 20250101_QD_125-UBND_Ke_hoach_phong_chong_thien_tai_Signed.pdf
//! ```
//!
//! ## Pipeline Overview
//!
//! ```text
//! documents
//!  │
//!  ├─ 1. Resolve   pick one generation-capable model for the run (cached)
//!  ├─ 2. Ingest    upload / sample / snapshot / excerpt, poll until Active
//!  ├─ 3. Extract   generate with transient-error retry and backoff
//!  ├─ 4. Sanitize  strip fences and quotes, one `.pdf`, reject junk
//!  └─ 5. Report    one result per document, in order (+ optional zip)
//! ```
//!
//! A failing document never stops the batch; only a rejected credential
//! does, and that is detected before any document is sent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_autoname::{load_documents, rename_batch, Credential, RenameConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let docs = load_documents(&["inbox/"])?;
//!     let key = Credential::new(std::env::var("GEMINI_API_KEY")?);
//!     let report = rename_batch(&docs, &key, &RenameConfig::default()).await?;
//!     for r in &report.results {
//!         match (&r.new_name, &r.error) {
//!             (Some(name), _) => println!("{} → {}", r.original_name, name),
//!             (_, Some(e)) => eprintln!("{}: {}", r.original_name, e),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfname` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf-autoname = { version = "0.3", default-features = false }
//! ```
//!
//! ## pdfium
//!
//! Only the `TruncatedSample`, `Snapshot` and `TextExcerpt` strategies need
//! the pdfium shared library. It is loaded from `PDFIUM_LIB_PATH` when set,
//! otherwise from the system library path. The default `DirectUpload`
//! strategy never touches it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    AssetState, BackendError, Credential, GenerationInput, InferenceBackend, ModelDescriptor,
    RemoteAsset,
};
pub use batch::{rename_batch, rename_batch_sync, rename_batch_with_cancel, save_renamed_copies};
pub use config::{
    Backoff, IngestStrategy, ModelPolicy, RenameConfig, RenameConfigBuilder, RetryPolicy,
};
pub use error::{DocumentError, PipelineError};
pub use output::{BatchReport, BatchStats, Document, ProcessingResult, ResultStatus};
pub use pipeline::input::{load_document, load_documents};
pub use pipeline::sanitize::sanitize;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{rename_stream, rename_stream_with_cancel};
pub use tokio_util::sync::CancellationToken;
