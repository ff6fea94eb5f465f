//! Batch entry points: rename every document in a batch and return a report.
//!
//! ## Failure containment
//!
//! Only a credential problem ([`PipelineError::AuthError`]) or a bad
//! configuration stops a run, and both are detected before the first
//! document is touched. Everything that goes wrong afterwards is caught at
//! the document boundary and recorded in that document's
//! [`ProcessingResult`]; the remaining documents carry on.
//!
//! ## Ordering
//!
//! Up to `concurrency` documents are in flight at once (the default of 1
//! processes them strictly one after another). Results are written into
//! per-index slots, so [`BatchReport::results`] follows submission order
//! whichever document finishes first. Use [`crate::stream::rename_stream`]
//! to receive results in completion order instead.
//!
//! ## Cancellation
//!
//! [`rename_batch_with_cancel`] takes a [`CancellationToken`]. Once it fires,
//! no further document starts, in-flight polls and retry waits end at their
//! next tick, and the report marks every unfinished document
//! [`DocumentError::Cancelled`].

use crate::archive::{build_archive, unique_name};
use crate::backend::gemini::GeminiBackend;
use crate::backend::{Credential, InferenceBackend, ModelDescriptor};
use crate::config::RenameConfig;
use crate::error::{DocumentError, PipelineError};
use crate::output::{BatchReport, BatchStats, Document, ProcessingResult};
use crate::pipeline::extract::{Extraction, ExtractionFailure, ResilientInferenceClient};
use crate::pipeline::ingest::RemoteAssetIngester;
use crate::pipeline::resolve::ModelResolver;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rename a batch of documents.
///
/// # Returns
/// `Ok(BatchReport)` with exactly one result per document, in submission
/// order, even when some or all documents failed (check
/// `report.stats.failed`).
///
/// # Errors
/// Returns `Err(PipelineError)` only for run-level failures:
/// - the credential is blank or rejected, or no usable model is reachable
/// - the archive was requested and could not be built
///
/// # Example
/// ```rust,no_run
/// use pdf_autoname::{rename_batch, Credential, Document, RenameConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let docs = vec![Document::new("scan_001.pdf", std::fs::read("scan_001.pdf")?)];
/// let key = Credential::new(std::env::var("GEMINI_API_KEY")?);
/// let report = rename_batch(&docs, &key, &RenameConfig::default()).await?;
/// for r in &report.results {
///     println!("{} → {:?}", r.original_name, r.new_name);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn rename_batch(
    documents: &[Document],
    credential: &Credential,
    config: &RenameConfig,
) -> Result<BatchReport, PipelineError> {
    rename_batch_with_cancel(documents, credential, config, CancellationToken::new()).await
}

/// [`rename_batch`] with an external cancellation signal.
pub async fn rename_batch_with_cancel(
    documents: &[Document],
    credential: &Credential,
    config: &RenameConfig,
    cancel: CancellationToken,
) -> Result<BatchReport, PipelineError> {
    let started = Instant::now();
    let total = documents.len();
    info!("Starting batch of {} documents", total);

    // ── Step 1: Resolve the model once ──────────────────────────────────
    let (pipeline, model) = DocumentPipeline::prepare(credential, config, cancel).await?;
    pipeline.progress.on_batch_start(total, &model.name);

    // ── Step 2: Run documents, at most `concurrency` at a time ──────────
    let mut slots: Vec<Option<ProcessingResult>> = vec![None; total];
    let mut completed = 0;
    let mut results = stream::iter(
        documents
            .iter()
            .enumerate()
            .map(|(index, document)| pipeline.process(index, document, total)),
    )
    .buffer_unordered(config.concurrency.max(1));

    while let Some(result) = results.next().await {
        completed += 1;
        pipeline.progress.on_progress(completed, total);
        let index = result.index;
        slots[index] = Some(result);
    }
    drop(results);

    // ── Step 3: Reassemble in submission order ──────────────────────────
    let results: Vec<ProcessingResult> = slots
        .into_iter()
        .zip(documents)
        .enumerate()
        .map(|(index, (slot, document))| {
            slot.unwrap_or_else(|| ProcessingResult::cancelled(index, document))
        })
        .collect();

    // ── Step 4: Optional archive of the originals ───────────────────────
    let archive = if config.build_archive {
        Some(build_archive(&results, documents, config.keep_failed_in_archive)?)
    } else {
        None
    };

    let stats = BatchStats::from_results(&results, started.elapsed().as_millis() as u64);
    info!(
        "Batch complete: {}/{} renamed, {} failed, {} cancelled, {}ms",
        stats.renamed, stats.total, stats.failed, stats.cancelled, stats.duration_ms
    );
    pipeline.progress.on_batch_complete(total, stats.renamed);

    Ok(BatchReport {
        model: model.name,
        results,
        archive,
        stats,
    })
}

/// Synchronous wrapper around [`rename_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn rename_batch_sync(
    documents: &[Document],
    credential: &Credential,
    config: &RenameConfig,
) -> Result<BatchReport, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(rename_batch(documents, credential, config))
}

/// Write each renamed document's original bytes into `dir` under its new name.
///
/// Each file is written to a temporary file in `dir` and then renamed into
/// place, so a crash never leaves a truncated PDF behind. Duplicate names
/// within the batch get `_2`, `_3`… suffixes. Returns the written paths in
/// submission order.
pub fn save_renamed_copies(
    report: &BatchReport,
    documents: &[Document],
    dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut used = HashSet::new();
    let mut written = Vec::new();
    for (name, document) in report.renamed_files(documents) {
        let path = dir.join(unique_name(name, &mut used));
        let write_err = |source: std::io::Error| PipelineError::OutputWriteFailed {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&document.bytes).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!("Saved {} as {}", document.display_name, path.display());
        written.push(path);
    }
    Ok(written)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Everything one run needs per document, shared by all document tasks.
pub(crate) struct DocumentPipeline {
    ingester: RemoteAssetIngester,
    client: ResilientInferenceClient,
    pub(crate) progress: ProgressCallback,
    cancel: CancellationToken,
}

impl DocumentPipeline {
    /// Pick the backend, resolve the model, and wire up the stages.
    pub(crate) async fn prepare(
        credential: &Credential,
        config: &RenameConfig,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, ModelDescriptor), PipelineError> {
        let backend = resolve_backend(config)?;
        let resolver = ModelResolver::new(Arc::clone(&backend), config.model_policy.clone())
            .with_pinned_model(config.model.clone());
        let model = resolver.resolve(credential).await?;
        info!("Backend {} using model {}", backend.name(), model.name);

        let pipeline = Self {
            ingester: RemoteAssetIngester::new(
                Arc::clone(&backend),
                credential.clone(),
                config,
                cancel.clone(),
            ),
            client: ResilientInferenceClient::new(
                backend,
                credential.clone(),
                model.clone(),
                config,
                cancel.clone(),
            ),
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            cancel,
        };
        Ok((Arc::new(pipeline), model))
    }

    /// Run one document to its terminal result. Never fails.
    pub(crate) async fn process(
        &self,
        index: usize,
        document: &Document,
        total: usize,
    ) -> ProcessingResult {
        if self.cancel.is_cancelled() {
            debug!("{}: skipped, run cancelled", document.display_name);
            let result = ProcessingResult::cancelled(index, document);
            self.progress
                .on_document_failed(index, total, &DocumentError::Cancelled.to_string());
            return result;
        }

        let started = Instant::now();
        self.progress.on_document_start(index, total, &document.display_name);

        let outcome = self.rename_one(index, document).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(extraction) => {
                info!(
                    "{} → {} ({} attempt(s), {}ms)",
                    document.display_name, extraction.file_name, extraction.attempts, duration_ms
                );
                self.progress
                    .on_document_renamed(index, total, &extraction.file_name);
                ProcessingResult::renamed(
                    index,
                    document,
                    extraction.file_name,
                    extraction.attempts,
                    duration_ms,
                )
            }
            Err(failure) => {
                if failure.error.is_cancelled() {
                    debug!("{}: cancelled", document.display_name);
                } else {
                    warn!("{}: {}", document.display_name, failure.error);
                }
                self.progress
                    .on_document_failed(index, total, &failure.error.to_string());
                let attempts = failure.attempts;
                ProcessingResult::failed(index, document, failure.error, attempts, duration_ms)
            }
        }
    }

    async fn rename_one(
        &self,
        index: usize,
        document: &Document,
    ) -> Result<Extraction, ExtractionFailure> {
        let asset = self.ingester.ingest(index, document).await?;
        let extraction = self.client.extract(index, &document.id, &asset.input).await;
        if let Some(remote_id) = &asset.remote_id {
            self.ingester.release(remote_id).await;
        }
        extraction
    }
}

/// The configured backend, or the Gemini REST backend by default.
fn resolve_backend(config: &RenameConfig) -> Result<Arc<dyn InferenceBackend>, PipelineError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let gemini = GeminiBackend::new(config.api_timeout_secs)
        .map_err(|e| PipelineError::Internal(format!("HTTP client setup failed: {e}")))?;
    Ok(Arc::new(gemini))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report_for(docs: &[Document]) -> BatchReport {
        let results = vec![
            ProcessingResult::renamed(0, &docs[0], "same.pdf".into(), 1, 1),
            ProcessingResult::failed(1, &docs[1], DocumentError::Cancelled, 0, 0),
            ProcessingResult::renamed(2, &docs[2], "same.pdf".into(), 1, 1),
        ];
        BatchReport {
            model: "m".into(),
            stats: BatchStats::from_results(&results, 3),
            results,
            archive: None,
        }
    }

    #[test]
    fn saved_copies_are_originals_with_unique_names() {
        let docs = vec![
            Document::new("a.pdf", b"%PDF a".to_vec()),
            Document::new("b.pdf", b"%PDF b".to_vec()),
            Document::new("c.pdf", b"%PDF c".to_vec()),
        ];
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("renamed");

        let written = save_renamed_copies(&report_for(&docs), &docs, &out).unwrap();

        assert_eq!(written, vec![out.join("same.pdf"), out.join("same_2.pdf")]);
        assert_eq!(std::fs::read(&written[0]).unwrap(), b"%PDF a");
        assert_eq!(std::fs::read(&written[1]).unwrap(), b"%PDF c");
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
    }
}
