//! Adapter that lets any `edgequake-llm` provider act as an inference backend.
//!
//! Chat-completion providers have no file storage, so "uploading" keeps the
//! payload in process memory and reports it `Active` straight away. The
//! generation call then attaches the held bytes as an image part. This makes
//! the adapter a natural fit for the snapshot and text-excerpt strategies;
//! whether a provider accepts a raw PDF attachment depends on the provider.

use super::{
    AssetState, BackendError, Credential, GenerationInput, GenerationOptions, InferenceBackend,
    ModelDescriptor, RemoteAsset, UploadRequest,
};
use crate::error::PipelineError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DEFAULT_PROVIDER_MODEL: &str = "gpt-4.1-nano";

/// Label used when the provider was auto-detected without a model override.
const AUTO_DETECTED_MODEL: &str = "provider-default";

/// Payloads "uploaded" to a provider that has no storage of its own.
#[derive(Debug, Default)]
struct HeldPayloads {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl HeldPayloads {
    fn insert(&self, mime_type: &str, bytes: &[u8]) -> String {
        let id = format!("inline/{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), (mime_type.to_string(), bytes.to_vec()));
        id
    }

    fn get(&self, id: &str) -> Option<(String, Vec<u8>)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn remove(&self, id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }
}

/// Backend over an `edgequake-llm` provider bound to a single model.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
    held: HeldPayloads,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            held: HeldPayloads::default(),
        }
    }

    /// Instantiate a named provider (`openai`, `anthropic`, `gemini`, `ollama`, …).
    ///
    /// The provider reads its own API key from the environment.
    pub fn from_name(provider_name: &str, model: &str) -> Result<Self, PipelineError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            PipelineError::AuthError {
                backend: provider_name.to_string(),
                detail: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, model))
    }

    /// Pick a provider the way the environment asks for one.
    ///
    /// 1. `provider_name` when given (model defaults to [`DEFAULT_PROVIDER_MODEL`])
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
    /// 3. Whatever `ProviderFactory::from_env` detects from API key variables
    pub fn detect(provider_name: Option<&str>, model: Option<&str>) -> Result<Self, PipelineError> {
        if let Some(name) = provider_name {
            return Self::from_name(name, model.unwrap_or(DEFAULT_PROVIDER_MODEL));
        }

        if let (Ok(name), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !name.is_empty() && !env_model.is_empty() {
                return Self::from_name(&name, model.unwrap_or(&env_model));
            }
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| PipelineError::AuthError {
                backend: "edgequake-llm".to_string(),
                detail: format!("no provider could be detected from the environment: {e}"),
            })?;
        Ok(Self::new(provider, model.unwrap_or(AUTO_DETECTED_MODEL)))
    }

    /// The model this backend always answers with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Providers authenticate from their own environment variables; the
    /// pipeline still wants a non-blank credential to pass around.
    pub fn ambient_credential() -> Credential {
        Credential::new("provider-environment")
    }

    fn attachment(&self, input: &GenerationInput) -> Result<Option<ImageData>, BackendError> {
        match input {
            GenerationInput::Asset(asset) => {
                let (mime_type, bytes) = self
                    .held
                    .get(&asset.remote_id)
                    .ok_or_else(|| {
                        BackendError::Rejected(format!("unknown asset '{}'", asset.remote_id))
                    })?;
                Ok(Some(ImageData::new(STANDARD.encode(bytes), mime_type).with_detail("high")))
            }
            GenerationInput::Inline { mime_type, bytes } => Ok(Some(
                ImageData::new(STANDARD.encode(bytes), mime_type.as_str()).with_detail("high"),
            )),
            GenerationInput::Text(_) => Ok(None),
        }
    }
}

#[async_trait]
impl InferenceBackend for ProviderBackend {
    fn name(&self) -> &str {
        "edgequake-llm"
    }

    async fn list_models(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<ModelDescriptor>, BackendError> {
        Ok(vec![ModelDescriptor::new(self.model.clone(), true)])
    }

    async fn upload_asset(
        &self,
        _credential: &Credential,
        request: UploadRequest<'_>,
    ) -> Result<RemoteAsset, BackendError> {
        let remote_id = self.held.insert(request.mime_type, request.bytes);
        debug!("Holding '{}' in memory as {}", request.display_name, remote_id);
        Ok(RemoteAsset {
            remote_id,
            state: AssetState::Active,
            mime_type: request.mime_type.to_string(),
            uri: None,
        })
    }

    async fn poll_asset(
        &self,
        _credential: &Credential,
        remote_id: &str,
    ) -> Result<RemoteAsset, BackendError> {
        let (mime_type, _) = self
            .held
            .get(remote_id)
            .ok_or_else(|| BackendError::Rejected(format!("unknown asset '{remote_id}'")))?;
        Ok(RemoteAsset {
            remote_id: remote_id.to_string(),
            state: AssetState::Active,
            mime_type,
            uri: None,
        })
    }

    async fn release_asset(
        &self,
        _credential: &Credential,
        remote_id: &str,
    ) -> Result<(), BackendError> {
        self.held.remove(remote_id);
        Ok(())
    }

    async fn generate(
        &self,
        _credential: &Credential,
        _model: &ModelDescriptor,
        input: &GenerationInput,
        instruction: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let mut messages = vec![ChatMessage::system(instruction)];
        match (input, self.attachment(input)?) {
            (GenerationInput::Text(text), _) => {
                messages.push(ChatMessage::user_with_images(text.as_str(), Vec::new()));
            }
            (_, Some(image)) => messages.push(ChatMessage::user_with_images("", vec![image])),
            (_, None) => return Err(BackendError::Rejected("nothing to attach".into())),
        }

        let completion = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_output_tokens as usize),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&completion))
            .await
            .map_err(|e| BackendError::from_message(e.to_string()))?;
        Ok(response.content)
    }
}
