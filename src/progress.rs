//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::RenameConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the batch.
//!
//! # Example
//!
//! ```rust
//! use pdf_autoname::{BatchProgressCallback, RenameConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_progress(&self, completed: usize, total: usize) {
//!         self.0.store(completed, Ordering::SeqCst);
//!         eprintln!("{:.0}%", 100.0 * completed as f64 / total as f64);
//!     }
//! }
//!
//! let config = RenameConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::backend::AssetState;
use std::sync::Arc;
use std::time::Duration;

/// Called by the batch orchestrator as documents move through the pipeline.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` events for
/// different documents arrive from different tasks. All methods default to
/// no-ops. `index` is always the 0-based position in the submitted batch.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after the model is resolved and before any document.
    fn on_batch_start(&self, total: usize, model: &str) {
        let _ = (total, model);
    }

    /// Called when a document enters ingestion.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called with every observed state of an uploaded asset, starting with
    /// the state the upload itself reported.
    fn on_asset_state(&self, index: usize, state: AssetState) {
        let _ = (index, state);
    }

    /// Called once per second while waiting before a retry.
    ///
    /// `attempt` is the attempt that just failed (1-based).
    fn on_retry_wait(&self, index: usize, attempt: u32, remaining: Duration) {
        let _ = (index, attempt, remaining);
    }

    /// Called when a document received its new name.
    fn on_document_renamed(&self, index: usize, total: usize, new_name: &str) {
        let _ = (index, total, new_name);
    }

    /// Called when a document failed or was cancelled.
    fn on_document_failed(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called after every finished document; `completed / total` is the
    /// batch fraction.
    fn on_progress(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }

    /// Called once after every document has a result.
    fn on_batch_complete(&self, total: usize, renamed: usize) {
        let _ = (total, renamed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenameConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
