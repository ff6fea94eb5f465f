//! Streaming API: emit each document's result as soon as it is final.
//!
//! ## Why stream?
//!
//! A batch of a few hundred scans can take an hour when the backend is
//! rate-limiting. A stream lets callers move or upload each renamed file the
//! moment it is ready instead of waiting for the whole report.
//!
//! Unlike [`crate::batch::rename_batch`], which returns results in submission
//! order, [`rename_stream`] yields them in completion order when
//! `concurrency > 1`. Sort by `index` if order matters.

use crate::backend::Credential;
use crate::batch::DocumentPipeline;
use crate::config::RenameConfig;
use crate::error::PipelineError;
use crate::output::{Document, ProcessingResult};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A boxed stream of per-document results.
pub type ResultStream = Pin<Box<dyn Stream<Item = ProcessingResult> + Send>>;

/// Rename documents, streaming results as they complete.
///
/// The model is resolved before this returns, so a rejected credential
/// surfaces here as `Err` rather than inside the stream. Every document
/// yields exactly one item. `on_batch_complete` is not called; the stream
/// ending is the completion signal.
pub async fn rename_stream(
    documents: Vec<Document>,
    credential: &Credential,
    config: &RenameConfig,
) -> Result<ResultStream, PipelineError> {
    rename_stream_with_cancel(documents, credential, config, CancellationToken::new()).await
}

/// [`rename_stream`] with an external cancellation signal.
///
/// After cancellation the stream still yields one (cancelled) result for
/// every document that had not finished.
pub async fn rename_stream_with_cancel(
    documents: Vec<Document>,
    credential: &Credential,
    config: &RenameConfig,
    cancel: CancellationToken,
) -> Result<ResultStream, PipelineError> {
    let total = documents.len();
    info!("Starting streaming batch of {} documents", total);

    let (pipeline, model) = DocumentPipeline::prepare(credential, config, cancel).await?;
    pipeline.progress.on_batch_start(total, &model.name);

    let progress = Arc::clone(&pipeline.progress);
    let mut completed = 0;

    let s = stream::iter(documents.into_iter().enumerate().map(move |(index, document)| {
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.process(index, &document, total).await }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .map(move |result| {
        completed += 1;
        progress.on_progress(completed, total);
        result
    });

    Ok(Box::pin(s))
}
