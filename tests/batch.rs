//! Integration tests for the batch and streaming entry points.
//!
//! Every test runs against `ScriptedBackend`, an in-memory backend whose
//! per-document behaviour (readiness delay, asset failure, generation
//! replies) is set up front. Time is paused, so multi-minute retry schedules
//! complete instantly while elapsed virtual time can still be asserted.

use async_trait::async_trait;
use futures::StreamExt;
use pdf_autoname::backend::{GenerationOptions, UploadRequest};
use pdf_autoname::prompts::UNREADABLE_TEXT_NOTE;
use pdf_autoname::{
    rename_batch, rename_batch_with_cancel, rename_stream, AssetState, BackendError,
    BatchProgressCallback, CancellationToken, Credential, Document, DocumentError, GenerationInput,
    InferenceBackend, IngestStrategy, ModelDescriptor, ModelPolicy, PipelineError, RemoteAsset,
    RenameConfig, ResultStatus,
};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ── Scripted backend ─────────────────────────────────────────────────────────

/// How the backend treats one document, keyed by display name.
#[derive(Default, Clone)]
struct Script {
    /// Polls before the asset reaches a terminal state (0 = Active on upload).
    polls_until_ready: u32,
    /// The terminal state is `Failed` instead of `Active`.
    asset_fails: bool,
    /// Replies to successive generation calls; once drained every call
    /// answers with a well-formed name derived from the document name.
    replies: VecDeque<Result<String, BackendError>>,
}

#[derive(Default)]
struct Calls {
    uploads: Vec<String>,
    uploaded_bytes: Vec<Vec<u8>>,
    /// Generation inputs that were not uploaded assets.
    inline: Vec<GenerationInput>,
    polls: HashMap<String, u32>,
    generations: HashMap<String, u32>,
    released: Vec<String>,
    models_used: Vec<String>,
}

struct ScriptedBackend {
    models: Result<Vec<ModelDescriptor>, BackendError>,
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Calls>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            models: Ok(vec![
                ModelDescriptor::new("models/text-embedding-004", false),
                ModelDescriptor::new("models/gemini-1.5-flash", true),
                ModelDescriptor::new("models/gemini-2.5-flash", true),
            ]),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Calls::default()),
        }
    }

    fn with_models(mut self, models: Result<Vec<ModelDescriptor>, BackendError>) -> Self {
        self.models = models;
        self
    }

    fn script(self, name: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(name.to_string(), script);
        self
    }

    fn generations(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().generations.get(name).copied().unwrap_or(0)
    }

    fn polls(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().polls.get(name).copied().unwrap_or(0)
    }

    fn total_generations(&self) -> u32 {
        self.calls.lock().unwrap().generations.values().sum()
    }

    fn uploaded_bytes(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().uploaded_bytes.clone()
    }

    fn inline_inputs(&self) -> Vec<GenerationInput> {
        self.calls.lock().unwrap().inline.clone()
    }

    fn uploads(&self) -> usize {
        self.calls.lock().unwrap().uploads.len()
    }

    fn released(&self) -> Vec<String> {
        self.calls.lock().unwrap().released.clone()
    }

    fn terminal_state(&self, name: &str) -> AssetState {
        let fails = self.scripts.lock().unwrap().get(name).is_some_and(|s| s.asset_fails);
        if fails {
            AssetState::Failed
        } else {
            AssetState::Active
        }
    }

    fn asset(name: &str, state: AssetState) -> RemoteAsset {
        RemoteAsset {
            remote_id: format!("files/{name}"),
            state,
            mime_type: "application/pdf".into(),
            uri: Some(format!("https://example.invalid/files/{name}")),
        }
    }
}

/// Generation key for inputs that carry no asset (snapshot, excerpt).
const INLINE: &str = "inline.pdf";

fn expected_name(display_name: &str) -> String {
    let stem = display_name.trim_end_matches(".pdf");
    format!("20250101_QD_{stem}_Ke_hoach_Signed.pdf")
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_models(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<ModelDescriptor>, BackendError> {
        self.models.clone()
    }

    async fn upload_asset(
        &self,
        _credential: &Credential,
        request: UploadRequest<'_>,
    ) -> Result<RemoteAsset, BackendError> {
        let name = request.display_name.to_string();
        {
            let mut calls = self.calls.lock().unwrap();
            calls.uploads.push(name.clone());
            calls.uploaded_bytes.push(request.bytes.to_vec());
        }
        let pending = self
            .scripts
            .lock()
            .unwrap()
            .get(&name)
            .map_or(0, |s| s.polls_until_ready);
        let state = if pending == 0 {
            self.terminal_state(&name)
        } else {
            AssetState::Processing
        };
        Ok(Self::asset(&name, state))
    }

    async fn poll_asset(
        &self,
        _credential: &Credential,
        remote_id: &str,
    ) -> Result<RemoteAsset, BackendError> {
        let name = remote_id.trim_start_matches("files/").to_string();
        let polled = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.polls.entry(name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let needed = self
            .scripts
            .lock()
            .unwrap()
            .get(&name)
            .map_or(0, |s| s.polls_until_ready);
        let state = if polled >= needed {
            self.terminal_state(&name)
        } else {
            AssetState::Processing
        };
        Ok(Self::asset(&name, state))
    }

    async fn release_asset(
        &self,
        _credential: &Credential,
        remote_id: &str,
    ) -> Result<(), BackendError> {
        self.calls.lock().unwrap().released.push(remote_id.to_string());
        Ok(())
    }

    async fn generate(
        &self,
        _credential: &Credential,
        model: &ModelDescriptor,
        input: &GenerationInput,
        _instruction: &str,
        _options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let name = match input {
            GenerationInput::Asset(asset) => {
                asset.remote_id.trim_start_matches("files/").to_string()
            }
            other => {
                self.calls.lock().unwrap().inline.push(other.clone());
                INLINE.to_string()
            }
        };
        {
            let mut calls = self.calls.lock().unwrap();
            *calls.generations.entry(name.clone()).or_insert(0) += 1;
            calls.models_used.push(model.name.clone());
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(|s| s.replies.pop_front());
        scripted.unwrap_or_else(|| {
            let stem = expected_name(&name);
            Ok(format!("```\n{}\n```", stem.trim_end_matches(".pdf")))
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn pdf(name: &str) -> Document {
    Document::new(name, format!("%PDF-1.7\n% {name}\n%%EOF").into_bytes())
}

fn docs(n: usize) -> Vec<Document> {
    (0..n).map(|i| pdf(&format!("scan_{i:03}.pdf"))).collect()
}

fn key() -> Credential {
    Credential::new("test-key")
}

fn config(backend: &Arc<ScriptedBackend>) -> pdf_autoname::RenameConfigBuilder {
    RenameConfig::builder().backend(Arc::clone(backend) as Arc<dyn InferenceBackend>)
}

fn rate_limited() -> Result<String, BackendError> {
    Err(BackendError::RateLimited {
        message: "429 Too Many Requests".into(),
        retry_after_secs: None,
    })
}

fn replies(items: Vec<Result<String, BackendError>>) -> Script {
    Script {
        replies: items.into(),
        ..Script::default()
    }
}

// ── Ordering and completeness ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn results_follow_submission_order_under_concurrency() {
    // Earlier documents take longer to become ready, so they finish last.
    let mut backend = ScriptedBackend::new();
    for i in 0..5u32 {
        backend = backend.script(
            &format!("scan_{i:03}.pdf"),
            Script {
                polls_until_ready: 4 - i,
                ..Script::default()
            },
        );
    }
    let backend = Arc::new(backend);
    let documents = docs(5);

    let report = rename_batch(&documents, &key(), &config(&backend).concurrency(3).build().unwrap())
        .await
        .unwrap();

    assert_eq!(report.results.len(), 5);
    for (i, r) in report.results.iter().enumerate() {
        assert_eq!(r.index, i);
        assert_eq!(r.original_name, documents[i].display_name);
        assert_eq!(r.new_name.as_deref(), Some(expected_name(&documents[i].display_name).as_str()));
        assert_eq!(r.attempts, 1);
    }
    assert_eq!(report.stats.renamed, 5);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.model, "models/gemini-2.5-flash");
}

#[tokio::test(start_paused = true)]
async fn readiness_is_polled_until_active() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "slow.pdf",
        Script {
            polls_until_ready: 3,
            ..Script::default()
        },
    ));
    let started = Instant::now();

    let report = rename_batch(&[pdf("slow.pdf")], &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    assert!(report.results[0].is_renamed());
    assert_eq!(backend.polls("slow.pdf"), 3);
    assert!(started.elapsed() >= Duration::from_secs(9));
    assert_eq!(backend.released(), vec!["files/slow.pdf".to_string()]);
}

// ── Retry behaviour ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "busy.pdf",
        replies(vec![
            rate_limited(),
            Err(BackendError::Unavailable("model overloaded".into())),
        ]),
    ));
    let started = Instant::now();

    let report = rename_batch(&[pdf("busy.pdf")], &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.status(), ResultStatus::Renamed);
    assert_eq!(r.attempts, 3);
    assert_eq!(backend.generations("busy.pdf"), 3);
    // 30 s after the first failure, 60 s after the second.
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert_eq!(report.stats.total_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_only_that_document() {
    let always_limited = replies(vec![rate_limited(), rate_limited(), rate_limited()]);
    let backend = Arc::new(ScriptedBackend::new().script("stuck.pdf", always_limited));
    let documents = vec![pdf("stuck.pdf"), pdf("fine.pdf")];

    let three_attempts = config(&backend).max_attempts(3).build().unwrap();
    let report = rename_batch(&documents, &key(), &three_attempts).await.unwrap();

    let stuck = &report.results[0];
    assert!(matches!(
        stuck.error,
        Some(DocumentError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(stuck.attempts, 3);
    assert_eq!(backend.generations("stuck.pdf"), 3);

    assert!(report.results[1].is_renamed());
    assert_eq!((report.stats.renamed, report.stats.failed), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn fatal_rejection_is_not_retried() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "blocked.pdf",
        replies(vec![Err(BackendError::Rejected("content policy".into()))]),
    ));

    let report = rename_batch(&[pdf("blocked.pdf")], &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    let r = &report.results[0];
    assert!(matches!(
        r.error,
        Some(DocumentError::ExtractionRejected { attempts: 1, .. })
    ));
    assert_eq!(r.attempts, 1);
    assert_eq!(backend.generations("blocked.pdf"), 1);
}

#[tokio::test(start_paused = true)]
async fn unusable_answer_fails_the_document() {
    let empty_fence = replies(vec![Ok("```\n```".into())]);
    let backend = Arc::new(ScriptedBackend::new().script("blank.pdf", empty_fence));

    let report = rename_batch(&[pdf("blank.pdf")], &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    assert!(matches!(report.results[0].error, Some(DocumentError::InvalidName { .. })));
    assert_eq!(report.results[0].attempts, 1);
}

// ── Ingestion failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_asset_never_reaches_generation() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "broken.pdf",
        Script {
            polls_until_ready: 2,
            asset_fails: true,
            ..Script::default()
        },
    ));

    let report = rename_batch(&[pdf("broken.pdf")], &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    let r = &report.results[0];
    assert!(matches!(r.error, Some(DocumentError::IngestFailed { .. })));
    assert_eq!(r.attempts, 0);
    assert_eq!(backend.generations("broken.pdf"), 0);
    assert_eq!(backend.released(), vec!["files/broken.pdf".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn non_pdf_is_rejected_without_upload() {
    let backend = Arc::new(ScriptedBackend::new());
    let documents = vec![Document::new("notes.docx", b"PK\x03\x04word".to_vec()), pdf("real.pdf")];

    let report = rename_batch(&documents, &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    assert!(matches!(
        report.results[0].error,
        Some(DocumentError::UnsupportedFormat { .. })
    ));
    assert!(report.results[1].is_renamed());
    assert_eq!(backend.uploads(), 1);
}

#[tokio::test(start_paused = true)]
async fn kept_remote_assets_are_not_released() {
    let backend = Arc::new(ScriptedBackend::new());

    rename_batch(&[pdf("a.pdf")], &key(), &config(&backend).release_assets(false).build().unwrap())
        .await
        .unwrap();

    assert!(backend.released().is_empty());
}

// ── Credential and model resolution ──────────────────────────────────────────

#[tokio::test]
async fn rejected_credential_aborts_before_any_document() {
    let rejected = Err(BackendError::Unauthorized("API key not valid".into()));
    let backend = Arc::new(ScriptedBackend::new().with_models(rejected));

    let err = rename_batch(&docs(3), &key(), &config(&backend).build().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::AuthError { .. }));
    assert!(err.to_string().contains("API key not valid"));
    assert_eq!(backend.uploads(), 0);
}

#[tokio::test]
async fn blank_credential_is_an_auth_error() {
    let backend = Arc::new(ScriptedBackend::new());

    let err = rename_batch(&docs(1), &Credential::new("   "), &config(&backend).build().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::AuthError { .. }));
    assert_eq!(backend.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn fallback_model_used_when_listing_has_no_generator() {
    let only_embeddings = Ok(vec![ModelDescriptor::new("models/text-embedding-004", false)]);

    let backend = Arc::new(ScriptedBackend::new().with_models(only_embeddings.clone()));
    let report = rename_batch(&docs(1), &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();
    assert_eq!(report.model, "models/gemini-1.5-flash");
    assert!(report.results[0].is_renamed());

    let backend = Arc::new(ScriptedBackend::new().with_models(only_embeddings));
    let strict = config(&backend)
        .model_policy(ModelPolicy::default().without_fallback())
        .build()
        .unwrap();
    let err = rename_batch(&docs(1), &key(), &strict).await.unwrap_err();
    assert!(matches!(err, PipelineError::AuthError { .. }));
    assert_eq!(backend.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn listing_error_aborts_the_run_by_default() {
    let backend = Arc::new(
        ScriptedBackend::new().with_models(Err(BackendError::Transport("connection reset".into()))),
    );
    let err = rename_batch(&docs(2), &key(), &config(&backend).build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AuthError { .. }));
    assert_eq!(backend.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn listing_error_falls_back_only_when_enabled() {
    let refused = || Err(BackendError::Rejected("listing not permitted for this key".into()));

    let backend = Arc::new(ScriptedBackend::new().with_models(refused()));
    let lenient = config(&backend)
        .model_policy(ModelPolicy::default().with_fallback_on_error())
        .build()
        .unwrap();
    let report = rename_batch(&docs(2), &key(), &lenient).await.unwrap();
    assert_eq!(report.model, "models/gemini-1.5-flash");
    assert_eq!(report.stats.renamed, 2);

    let backend = Arc::new(ScriptedBackend::new().with_models(refused()));
    let strict = config(&backend)
        .model_policy(ModelPolicy::default().with_fallback_on_error().without_fallback())
        .build()
        .unwrap();
    let err = rename_batch(&docs(2), &key(), &strict).await.unwrap_err();
    assert!(matches!(err, PipelineError::AuthError { .. }));
    assert_eq!(backend.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn pinned_model_skips_listing() {
    // Listing would fail; a pinned model never asks.
    let unavailable = Err(BackendError::Transport("listing unavailable".into()));
    let backend = Arc::new(ScriptedBackend::new().with_models(unavailable));

    let pinned = config(&backend).model("models/custom-pro").build().unwrap();
    let report = rename_batch(&docs(2), &key(), &pinned).await.unwrap();

    assert_eq!(report.model, "models/custom-pro");
    assert_eq!(report.stats.renamed, 2);
    let used = backend.calls.lock().unwrap().models_used.clone();
    assert!(used.iter().all(|m| m == "models/custom-pro"));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cancels the run once `after` documents have been renamed.
struct CancelAfter {
    token: CancellationToken,
    after: usize,
    renamed: AtomicUsize,
    failed_events: AtomicUsize,
}

impl BatchProgressCallback for CancelAfter {
    fn on_document_renamed(&self, _index: usize, _total: usize, _new_name: &str) {
        if self.renamed.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
    }

    fn on_document_failed(&self, _index: usize, _total: usize, _error: &str) {
        self.failed_events.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_marks_remaining_documents() {
    let backend = Arc::new(ScriptedBackend::new());
    let token = CancellationToken::new();
    let progress = Arc::new(CancelAfter {
        token: token.clone(),
        after: 2,
        renamed: AtomicUsize::new(0),
        failed_events: AtomicUsize::new(0),
    });
    let cfg = config(&backend)
        .progress_callback(Arc::clone(&progress) as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();
    let documents = docs(5);

    let report = rename_batch_with_cancel(&documents, &key(), &cfg, token).await.unwrap();

    let statuses: Vec<_> = report.results.iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        vec![
            ResultStatus::Renamed,
            ResultStatus::Renamed,
            ResultStatus::Cancelled,
            ResultStatus::Cancelled,
            ResultStatus::Cancelled,
        ]
    );
    assert!(report.was_cancelled());
    assert_eq!(report.stats.cancelled, 3);
    assert_eq!(backend.uploads(), 2);
    assert_eq!(progress.failed_events.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_retry_wait() {
    let backend =
        Arc::new(ScriptedBackend::new().script("busy.pdf", replies(vec![rate_limited()])));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });
    let started = Instant::now();

    let cfg = config(&backend).build().unwrap();
    let report = rename_batch_with_cancel(&[pdf("busy.pdf")], &key(), &cfg, token)
        .await
        .unwrap();

    assert_eq!(report.results[0].status(), ResultStatus::Cancelled);
    assert_eq!(backend.generations("busy.pdf"), 1);
    assert!(started.elapsed() < Duration::from_secs(30));
}

// ── Outputs ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn archive_holds_renamed_originals() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "scan_001.pdf",
        replies(vec![Err(BackendError::Rejected("policy".into()))]),
    ));
    let documents = docs(3);
    let cfg = config(&backend).build_archive(true).keep_failed_in_archive(true).build().unwrap();

    let report = rename_batch(&documents, &key(), &cfg).await.unwrap();

    let zip = report.archive.clone().expect("archive requested");
    let mut archive = zip::ZipArchive::new(Cursor::new(zip)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            expected_name("scan_000.pdf"),
            "ERROR_scan_001.pdf".to_string(),
            expected_name("scan_002.pdf"),
        ]
    );

    let mut first = Vec::new();
    std::io::Read::read_to_end(&mut archive.by_index(0).unwrap(), &mut first).unwrap();
    assert_eq!(first, documents[0].bytes.to_vec());
}

#[tokio::test(start_paused = true)]
async fn report_serialises_without_archive_bytes() {
    let backend = Arc::new(ScriptedBackend::new());
    let cfg = config(&backend).build_archive(true).build().unwrap();

    let report = rename_batch(&docs(1), &key(), &cfg).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert!(json.get("archive").is_none());
    assert_eq!(json["stats"]["renamed"], 1);
    assert_eq!(json["results"][0]["new_name"], expected_name("scan_000.pdf"));
}

#[tokio::test(start_paused = true)]
async fn stream_yields_one_result_per_document() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "scan_002.pdf",
        replies(vec![Err(BackendError::Rejected("policy".into()))]),
    ));

    let stream = rename_stream(docs(4), &key(), &config(&backend).concurrency(2).build().unwrap())
        .await
        .unwrap();
    let mut results: Vec<_> = stream.collect().await;
    results.sort_by_key(|r| r.index);

    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|r| r.is_renamed()).count(), 3);
    assert_eq!(results[2].status(), ResultStatus::Failed);
}

#[tokio::test]
async fn stream_surfaces_auth_error_up_front() {
    let backend = Arc::new(
        ScriptedBackend::new().with_models(Err(BackendError::Unauthorized("revoked".into()))),
    );

    let result = rename_stream(docs(2), &key(), &config(&backend).build().unwrap()).await;

    assert!(matches!(result, Err(PipelineError::AuthError { .. })));
}

// ── Strategies that go through pdfium ────────────────────────────────────────
//
// The scripted documents are not real PDFs, so every pdfium step fails and
// these tests cover each strategy's failure path.

fn no_pdfium_download() {
    std::env::set_var(pdfium_auto::OFFLINE_ENV, "1");
}

#[tokio::test(start_paused = true)]
async fn failed_sample_uploads_the_original_bytes() {
    no_pdfium_download();
    let backend = Arc::new(ScriptedBackend::new());
    let documents = docs(2);
    let sampled = config(&backend)
        .strategy(IngestStrategy::TruncatedSample { pages: 2 })
        .build()
        .unwrap();

    let report = rename_batch(&documents, &key(), &sampled).await.unwrap();

    assert_eq!(report.stats.renamed, 2);
    let mut uploaded = backend.uploaded_bytes();
    uploaded.sort();
    let mut originals: Vec<Vec<u8>> = documents.iter().map(|d| d.bytes.to_vec()).collect();
    originals.sort();
    assert_eq!(uploaded, originals);
}

#[tokio::test(start_paused = true)]
async fn failed_snapshot_never_reaches_generation() {
    no_pdfium_download();
    let backend = Arc::new(ScriptedBackend::new());
    let snapshot = config(&backend).strategy(IngestStrategy::Snapshot).build().unwrap();

    let report = rename_batch(&docs(2), &key(), &snapshot).await.unwrap();

    for r in &report.results {
        assert!(
            matches!(r.error, Some(DocumentError::SnapshotFailed { .. })),
            "got {:?}",
            r.error
        );
        assert_eq!(r.attempts, 0);
    }
    assert_eq!(backend.uploads(), 0);
    assert_eq!(backend.total_generations(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreadable_excerpt_is_named_from_the_note() {
    no_pdfium_download();
    let backend = Arc::new(ScriptedBackend::new());
    let excerpt = config(&backend)
        .strategy(IngestStrategy::TextExcerpt { max_chars: 500 })
        .build()
        .unwrap();

    let report = rename_batch(&docs(1), &key(), &excerpt).await.unwrap();

    assert_eq!(report.results[0].new_name.as_deref(), Some(expected_name(INLINE).as_str()));
    assert_eq!(backend.uploads(), 0);
    match backend.inline_inputs().as_slice() {
        [GenerationInput::Text(text)] => assert!(text.contains(UNREADABLE_TEXT_NOTE)),
        other => panic!("expected one text input, got {other:?}"),
    }
}

// ── Loading from disk ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn bad_file_in_folder_fails_only_itself() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.4 first").unwrap();
    std::fs::write(dir.path().join("b.pdf"), b"").unwrap();
    std::fs::write(dir.path().join("c.pdf"), b"%PDF-1.4 third").unwrap();

    let documents = pdf_autoname::load_documents(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(documents.len(), 3);

    let backend = Arc::new(ScriptedBackend::new());
    let report = rename_batch(&documents, &key(), &config(&backend).build().unwrap())
        .await
        .unwrap();

    let statuses: Vec<_> = report.results.iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        vec![ResultStatus::Renamed, ResultStatus::Failed, ResultStatus::Renamed]
    );
    assert!(matches!(
        report.results[1].error,
        Some(DocumentError::UnsupportedFormat { .. })
    ));
    assert_eq!(backend.uploads(), 2);
}
