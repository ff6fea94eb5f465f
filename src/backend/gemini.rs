//! Generative Language REST backend.
//!
//! ## Endpoints used
//!
//! | Capability | Request |
//! |------------|---------|
//! | list models | `GET  /v1beta/models?pageSize=…&pageToken=…` |
//! | upload      | `POST /upload/v1beta/files` (resumable: `start`, then `upload, finalize`) |
//! | poll        | `GET  /v1beta/files/{id}` |
//! | release     | `DELETE /v1beta/files/{id}` |
//! | generate    | `POST /v1beta/{model}:generateContent` |
//!
//! The credential travels in the `x-goog-api-key` header, never in the URL,
//! so it cannot leak through request logging.

use super::{
    AssetState, BackendError, Credential, GenerationInput, GenerationOptions, InferenceBackend,
    ModelDescriptor, RemoteAsset, UploadRequest,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const KEY_HEADER: &str = "x-goog-api-key";
const GENERATE_METHOD: &str = "generateContent";

/// Backend for the Generative Language API.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl GeminiBackend {
    /// Build a backend whose individual HTTP calls time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout_secs)
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let code = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(code, retry_after, &body))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: Response,
    ) -> Result<T, BackendError> {
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl InferenceBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn list_models(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ModelDescriptor>, BackendError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/v1beta/models", self.base_url))
                .header(KEY_HEADER, credential.expose())
                .query(&[("pageSize", "1000")]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ModelList = Self::read_json(self.send(request).await?).await?;
            models.extend(page.models.into_iter().map(ModelEntry::into_descriptor));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} models", models.len());
        Ok(models)
    }

    async fn upload_asset(
        &self,
        credential: &Credential,
        request: UploadRequest<'_>,
    ) -> Result<RemoteAsset, BackendError> {
        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(KEY_HEADER, credential.expose())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", request.bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", request.mime_type)
            .json(&json!({ "file": { "display_name": request.display_name } }));

        let session = self.send(start).await?;
        let upload_url = session
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                BackendError::Protocol("upload session has no x-goog-upload-url header".into())
            })?;

        let finalize = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(request.bytes.to_vec());

        let envelope: FileEnvelope = Self::read_json(self.send(finalize).await?).await?;
        let asset = envelope.file.into_asset(Some(request.mime_type));
        debug!("Uploaded '{}' as {} ({:?})", request.display_name, asset.remote_id, asset.state);
        Ok(asset)
    }

    async fn poll_asset(
        &self,
        credential: &Credential,
        remote_id: &str,
    ) -> Result<RemoteAsset, BackendError> {
        let request = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, remote_id))
            .header(KEY_HEADER, credential.expose());
        let file: FileResource = Self::read_json(self.send(request).await?).await?;
        Ok(file.into_asset(None))
    }

    async fn release_asset(
        &self,
        credential: &Credential,
        remote_id: &str,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .delete(format!("{}/v1beta/{}", self.base_url, remote_id))
            .header(KEY_HEADER, credential.expose());
        self.send(request).await?;
        Ok(())
    }

    async fn generate(
        &self,
        credential: &Credential,
        model: &ModelDescriptor,
        input: &GenerationInput,
        instruction: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let body = generate_body(input, instruction, options);
        let request = self
            .client
            .post(format!(
                "{}/v1beta/{}:{}",
                self.base_url,
                model_path(&model.name),
                GENERATE_METHOD
            ))
            .header(KEY_HEADER, credential.expose())
            .json(&body);

        let response: GenerateResponse = Self::read_json(self.send(request).await?).await?;
        response.into_text()
    }
}

// ── Request building ─────────────────────────────────────────────────────

fn model_path(name: &str) -> String {
    if name.starts_with("models/") || name.starts_with("tunedModels/") {
        name.to_string()
    } else {
        format!("models/{name}")
    }
}

fn generate_body(input: &GenerationInput, instruction: &str, options: &GenerationOptions) -> Value {
    let parts = match input {
        GenerationInput::Asset(asset) => vec![
            json!({ "text": instruction }),
            json!({ "file_data": {
                "mime_type": asset.mime_type,
                "file_uri": asset.uri.as_deref().unwrap_or(&asset.remote_id),
            }}),
        ],
        GenerationInput::Inline { mime_type, bytes } => vec![
            json!({ "text": instruction }),
            json!({ "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(bytes) } }),
        ],
        GenerationInput::Text(text) => vec![json!({ "text": format!("{instruction}\n\n{text}") })],
    };

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": options.temperature,
            "maxOutputTokens": options.max_output_tokens,
        },
    })
}

// ── Response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl ModelEntry {
    fn into_descriptor(self) -> ModelDescriptor {
        let supports_generation = self
            .supported_generation_methods
            .iter()
            .any(|m| m == GENERATE_METHOD);
        ModelDescriptor::new(self.name, supports_generation)
    }
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    mime_type: Option<String>,
    uri: Option<String>,
    state: Option<String>,
}

impl FileResource {
    /// A missing `mimeType` becomes `known_mime`, or empty when there is none.
    fn into_asset(self, known_mime: Option<&str>) -> RemoteAsset {
        RemoteAsset {
            state: parse_state(self.state.as_deref()),
            mime_type: self
                .mime_type
                .or_else(|| known_mime.map(str::to_string))
                .unwrap_or_default(),
            uri: self.uri,
            remote_id: self.name,
        }
    }
}

fn parse_state(state: Option<&str>) -> AssetState {
    match state {
        Some("PROCESSING") => AssetState::Processing,
        Some("ACTIVE") => AssetState::Active,
        Some("FAILED") => AssetState::Failed,
        _ => AssetState::Pending,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, BackendError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(BackendError::Rejected(format!("prompt blocked: {reason}")));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text);
        }

        match candidate.finish_reason.as_deref() {
            Some(
                reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"),
            ) => Err(BackendError::Rejected(format!("response blocked: {reason}"))),
            _ => Err(BackendError::Protocol("response carried no text".into())),
        }
    }
}

// ── Error mapping ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

/// Map a non-success HTTP answer onto the backend error taxonomy.
fn classify_status(code: u16, retry_after: Option<u64>, body: &str) -> BackendError {
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok().map(|e| e.error);

    let status = parsed
        .as_ref()
        .and_then(|e| e.status.clone())
        .unwrap_or_default();
    let detail = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.trim().to_string());
    let message = if detail.is_empty() {
        format!("HTTP {code}")
    } else {
        format!("HTTP {code}: {detail}")
    };
    let retry_after = retry_after.or_else(|| parsed.as_ref().and_then(|e| retry_delay(&e.details)));

    match (code, status.as_str()) {
        (429, _) | (_, "RESOURCE_EXHAUSTED") => BackendError::RateLimited {
            message,
            retry_after_secs: retry_after,
        },
        (503, _) | (_, "UNAVAILABLE") => BackendError::Unavailable(message),
        (504, _) | (_, "DEADLINE_EXCEEDED") => BackendError::Unavailable(message),
        (401 | 403, _) | (_, "UNAUTHENTICATED" | "PERMISSION_DENIED") => {
            BackendError::Unauthorized(message)
        }
        // An invalid key is reported as a plain 400.
        _ if detail.contains("API key not valid") => BackendError::Unauthorized(message),
        _ => BackendError::Rejected(message),
    }
}

/// Pull `RetryInfo.retryDelay` (e.g. `"37s"`) out of error details.
fn retry_delay(details: &[Value]) -> Option<u64> {
    details
        .iter()
        .filter_map(|d| d.get("retryDelay").and_then(Value::as_str))
        .find_map(|delay| delay.trim_end_matches('s').parse::<f64>().ok())
        .map(|secs| secs.ceil() as u64)
}
