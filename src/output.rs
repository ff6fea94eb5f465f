//! Input and output records of a renaming run.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A document submitted for renaming.
///
/// The bytes are shared behind an `Arc` so concurrent tasks and the archive
/// builder can read them without copying; nothing mutates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub display_name: String,
    pub bytes: Arc<[u8]>,
}

impl Document {
    /// The display name doubles as the id unless [`Document::with_id`] is used.
    pub fn new(display_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let display_name = display_name.into();
        Self {
            id: display_name.clone(),
            display_name,
            bytes: bytes.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// First four bytes, zero-padded for very short inputs.
    pub fn magic(&self) -> [u8; 4] {
        let mut magic = [0u8; 4];
        let n = self.bytes.len().min(4);
        magic[..n].copy_from_slice(&self.bytes[..n]);
        magic
    }

    pub fn is_pdf(&self) -> bool {
        self.bytes.starts_with(b"%PDF")
    }
}

/// Terminal record for one document. Exactly one exists per submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// 0-based position in the submitted batch.
    pub index: usize,
    pub document_id: String,
    pub original_name: String,
    /// Set on success.
    pub new_name: Option<String>,
    /// Set on failure or cancellation.
    pub error: Option<DocumentError>,
    /// Generation attempts spent on this document.
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Coarse outcome of a [`ProcessingResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Renamed,
    Failed,
    Cancelled,
}

impl ProcessingResult {
    pub(crate) fn renamed(
        index: usize,
        document: &Document,
        new_name: String,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            index,
            document_id: document.id.clone(),
            original_name: document.display_name.clone(),
            new_name: Some(new_name),
            error: None,
            attempts,
            duration_ms,
        }
    }

    pub(crate) fn failed(
        index: usize,
        document: &Document,
        error: DocumentError,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            index,
            document_id: document.id.clone(),
            original_name: document.display_name.clone(),
            new_name: None,
            error: Some(error),
            attempts,
            duration_ms,
        }
    }

    /// A document that never started because the run was cancelled.
    pub(crate) fn cancelled(index: usize, document: &Document) -> Self {
        Self::failed(index, document, DocumentError::Cancelled, 0, 0)
    }

    pub fn status(&self) -> ResultStatus {
        match (&self.new_name, &self.error) {
            (Some(_), None) => ResultStatus::Renamed,
            (_, Some(DocumentError::Cancelled)) => ResultStatus::Cancelled,
            _ => ResultStatus::Failed,
        }
    }

    pub fn is_renamed(&self) -> bool {
        self.status() == ResultStatus::Renamed
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub renamed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_attempts: u64,
    pub duration_ms: u64,
}

impl BatchStats {
    pub(crate) fn from_results(results: &[ProcessingResult], duration_ms: u64) -> Self {
        let count = |s: ResultStatus| results.iter().filter(|r| r.status() == s).count();
        Self {
            total: results.len(),
            renamed: count(ResultStatus::Renamed),
            failed: count(ResultStatus::Failed),
            cancelled: count(ResultStatus::Cancelled),
            total_attempts: results.iter().map(|r| r.attempts as u64).sum(),
            duration_ms,
        }
    }
}

/// Result of a complete (or cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// The model every document was sent to.
    pub model: String,
    /// One entry per submitted document, in submission order.
    pub results: Vec<ProcessingResult>,
    /// Zip of the renamed originals, when requested.
    #[serde(skip)]
    pub archive: Option<Vec<u8>>,
    pub stats: BatchStats,
}

impl BatchReport {
    /// Pair each successful result with its document's original bytes.
    ///
    /// `documents` must be the slice that was submitted to the run.
    pub fn renamed_files<'a>(
        &'a self,
        documents: &'a [Document],
    ) -> impl Iterator<Item = (&'a str, &'a Document)> + 'a {
        self.results.iter().filter_map(move |r| {
            let name = r.new_name.as_deref()?;
            documents.get(r.index).map(|d| (name, d))
        })
    }

    pub fn was_cancelled(&self) -> bool {
        self.stats.cancelled > 0
    }
}
