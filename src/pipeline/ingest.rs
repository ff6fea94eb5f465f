//! Ingestion: turn a [`Document`] into something a generation request can
//! carry, and wait until the backend is ready to use it.
//!
//! ## Strategies
//!
//! | Strategy            | Sent to backend              | Readiness polling |
//! |---------------------|------------------------------|-------------------|
//! | `DirectUpload`      | original bytes, as uploaded  | yes               |
//! | `TruncatedSample`   | first N pages (or original)  | yes               |
//! | `Snapshot`          | page one as PNG, inline      | no                |
//! | `TextExcerpt`       | page-one text, inline        | no                |
//!
//! Direct upload never alters the bytes, so signed documents keep a valid
//! signature on the backend side. A sample that cannot be cut falls back to
//! the original bytes; a snapshot that cannot be rendered fails the document.
//!
//! ## Readiness
//!
//! An uploaded asset starts in `Processing`. The ingester waits
//! `poll_interval`, polls, and repeats until the asset is `Active` or
//! `Failed`, giving up with [`DocumentError::IngestTimeout`] once
//! `max_ingest_wait` has elapsed. Every wait honours the run's
//! cancellation token.
//!
//! An upload that is already on the wire when the run is cancelled gets
//! [`RELEASE_TIMEOUT`] to finish so its remote copy can be released. Releases
//! after cancellation are bounded by the same timeout.

use crate::backend::{
    AssetState, BackendError, Credential, GenerationInput, InferenceBackend, RemoteAsset,
    UploadRequest,
};
use crate::config::{IngestStrategy, RenameConfig};
use crate::error::DocumentError;
use crate::output::Document;
use crate::pipeline::encode::{encode_png, SNAPSHOT_MIME};
use crate::pipeline::render;
use crate::pipeline::wait::{run_or_cancel, wait_or_cancel};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::excerpt_message;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PDF_MIME: &str = "application/pdf";

/// Grace period for in-flight uploads and releases once the run is cancelled.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// A document ready for generation.
#[derive(Debug, Clone)]
pub struct IngestedAsset {
    pub input: GenerationInput,
    /// Set when the backend holds a copy that should be released afterwards.
    pub remote_id: Option<String>,
}

impl IngestedAsset {
    fn inline(input: GenerationInput) -> Self {
        Self { input, remote_id: None }
    }

    fn uploaded(asset: RemoteAsset) -> Self {
        Self {
            remote_id: Some(asset.remote_id.clone()),
            input: GenerationInput::Asset(asset),
        }
    }
}

/// Produces generation inputs from documents according to one strategy.
pub struct RemoteAssetIngester {
    backend: Arc<dyn InferenceBackend>,
    credential: Credential,
    strategy: IngestStrategy,
    poll_interval: Duration,
    max_wait: Duration,
    snapshot_max_pixels: u32,
    release_assets: bool,
    progress: ProgressCallback,
    cancel: CancellationToken,
}

impl RemoteAssetIngester {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        credential: Credential,
        config: &RenameConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            credential,
            strategy: config.strategy,
            poll_interval: config.poll_interval,
            max_wait: config.max_ingest_wait,
            snapshot_max_pixels: config.snapshot_max_pixels,
            release_assets: config.release_assets,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            cancel,
        }
    }

    /// Ingest `document` (at batch position `index`) with the configured strategy.
    pub async fn ingest(
        &self,
        index: usize,
        document: &Document,
    ) -> Result<IngestedAsset, DocumentError> {
        if !document.is_pdf() {
            return Err(DocumentError::UnsupportedFormat {
                magic: document.magic().to_vec(),
            });
        }

        match self.strategy {
            IngestStrategy::DirectUpload => {
                self.upload_and_wait(index, document, &document.bytes).await
            }
            IngestStrategy::TruncatedSample { pages } => {
                self.ingest_sample(index, document, pages).await
            }
            IngestStrategy::Snapshot => self.ingest_snapshot(document).await,
            IngestStrategy::TextExcerpt { max_chars } => {
                self.ingest_excerpt(document, max_chars).await
            }
        }
    }

    async fn ingest_sample(
        &self,
        index: usize,
        document: &Document,
        pages: u16,
    ) -> Result<IngestedAsset, DocumentError> {
        let sample = render::sample_leading_pages(document.bytes.clone(), pages);
        let sampled = run_or_cancel(sample, &self.cancel).await?;
        match sampled {
            Ok(sample) => self.upload_and_wait(index, document, &sample).await,
            Err(detail) => {
                warn!(
                    "{}: page sampling failed ({}), uploading the full document",
                    document.display_name, detail
                );
                self.upload_and_wait(index, document, &document.bytes).await
            }
        }
    }

    async fn ingest_snapshot(&self, document: &Document) -> Result<IngestedAsset, DocumentError> {
        let image = run_or_cancel(
            render::render_first_page(document.bytes.clone(), self.snapshot_max_pixels),
            &self.cancel,
        )
        .await?
        .map_err(|detail| DocumentError::SnapshotFailed { detail })?;

        let png = encode_png(&image).map_err(|e| DocumentError::SnapshotFailed {
            detail: format!("PNG encoding failed: {e}"),
        })?;

        Ok(IngestedAsset::inline(GenerationInput::Inline {
            mime_type: SNAPSHOT_MIME.to_string(),
            bytes: png,
        }))
    }

    async fn ingest_excerpt(
        &self,
        document: &Document,
        max_chars: usize,
    ) -> Result<IngestedAsset, DocumentError> {
        let excerpt = render::first_page_text(document.bytes.clone(), max_chars);
        let text = run_or_cancel(excerpt, &self.cancel)
            .await?
            .unwrap_or_else(|detail| {
                warn!("{}: text extraction failed ({})", document.display_name, detail);
                String::new()
            });
        debug!("{}: excerpt of {} chars", document.display_name, text.chars().count());

        Ok(IngestedAsset::inline(GenerationInput::Text(excerpt_message(&text))))
    }

    async fn upload_and_wait(
        &self,
        index: usize,
        document: &Document,
        bytes: &[u8],
    ) -> Result<IngestedAsset, DocumentError> {
        let asset = self
            .upload(document, bytes)
            .await?
            .map_err(|e| DocumentError::IngestFailed {
                detail: format!("upload failed: {e}"),
            })?;
        info!(
            "{}: uploaded {} bytes as {}",
            document.display_name,
            bytes.len(),
            asset.remote_id
        );

        let remote_id = asset.remote_id.clone();
        match self.wait_until_active(index, asset).await {
            Ok(active) => Ok(IngestedAsset::uploaded(active)),
            Err(e) => {
                self.release(&remote_id).await;
                Err(e)
            }
        }
    }

    /// Upload unless cancelled first. A cancellation that lands mid-upload
    /// lets the upload finish (bounded) and releases whatever it created.
    async fn upload(
        &self,
        document: &Document,
        bytes: &[u8],
    ) -> Result<Result<RemoteAsset, BackendError>, DocumentError> {
        if self.cancel.is_cancelled() {
            return Err(DocumentError::Cancelled);
        }
        let request = UploadRequest {
            display_name: &document.display_name,
            mime_type: PDF_MIME,
            bytes,
        };
        let upload = self.backend.upload_asset(&self.credential, request);
        tokio::pin!(upload);

        tokio::select! {
            biased;
            uploaded = &mut upload => Ok(uploaded),
            _ = self.cancel.cancelled() => {
                match time::timeout(RELEASE_TIMEOUT, upload).await {
                    Ok(Ok(orphan)) => self.release(&orphan.remote_id).await,
                    Ok(Err(_)) => {}
                    Err(_) => warn!(
                        "{}: upload still running after cancellation, abandoned",
                        document.display_name
                    ),
                }
                Err(DocumentError::Cancelled)
            }
        }
    }

    /// Poll until the asset reaches a terminal state, bounded by `max_wait`.
    async fn wait_until_active(
        &self,
        index: usize,
        mut asset: RemoteAsset,
    ) -> Result<RemoteAsset, DocumentError> {
        let started = Instant::now();

        loop {
            self.progress.on_asset_state(index, asset.state);
            if asset.state.is_terminal() {
                return match asset.state {
                    AssetState::Active => Ok(asset),
                    _ => Err(DocumentError::IngestFailed {
                        detail: "backend rejected asset".into(),
                    }),
                };
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_wait {
                return Err(DocumentError::IngestTimeout {
                    remote_id: asset.remote_id,
                    waited_secs: elapsed.as_secs(),
                });
            }

            wait_or_cancel(self.poll_interval, &self.cancel, |_| {}).await?;

            let poll = self.backend.poll_asset(&self.credential, &asset.remote_id);
            match run_or_cancel(poll, &self.cancel).await? {
                Ok(mut next) => {
                    debug!("{}: {:?}", next.remote_id, next.state);
                    if next.mime_type.is_empty() {
                        next.mime_type = std::mem::take(&mut asset.mime_type);
                    }
                    asset = next;
                }
                Err(e) if e.is_transient() => {
                    warn!("{}: poll failed ({}), will poll again", asset.remote_id, e);
                }
                Err(e) => {
                    return Err(DocumentError::IngestFailed {
                        detail: format!("polling failed: {e}"),
                    })
                }
            }
        }
    }

    /// Best-effort release of a backend copy; failures are only logged.
    ///
    /// After cancellation the call is abandoned once [`RELEASE_TIMEOUT`] passes.
    pub async fn release(&self, remote_id: &str) {
        if !self.release_assets {
            return;
        }
        let call = self.backend.release_asset(&self.credential, remote_id);
        let outcome = if self.cancel.is_cancelled() {
            match time::timeout(RELEASE_TIMEOUT, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Gave up releasing {} after cancellation", remote_id);
                    return;
                }
            }
        } else {
            call.await
        };

        match outcome {
            Ok(()) => debug!("Released {}", remote_id),
            Err(BackendError::Unauthorized(detail)) => {
                warn!("Not allowed to release {}: {}", remote_id, detail)
            }
            Err(e) => warn!("Could not release {}: {}", remote_id, e),
        }
    }
}
