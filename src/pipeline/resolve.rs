//! Model resolution: pick one generation-capable model per run.
//!
//! The choice is made once and cached for the lifetime of the
//! [`ModelResolver`]; documents never trigger their own listing call.
//! A new run builds a new resolver, which is the only invalidation.

use crate::backend::{BackendError, Credential, InferenceBackend, ModelDescriptor};
use crate::config::ModelPolicy;
use crate::error::PipelineError;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub struct ModelResolver {
    backend: Arc<dyn InferenceBackend>,
    policy: ModelPolicy,
    pinned: Option<String>,
    cached: OnceCell<ModelDescriptor>,
}

impl ModelResolver {
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: ModelPolicy) -> Self {
        Self {
            backend,
            policy,
            pinned: None,
            cached: OnceCell::new(),
        }
    }

    /// Skip enumeration and use `model` as-is.
    pub fn with_pinned_model(mut self, model: Option<String>) -> Self {
        self.pinned = model;
        self
    }

    /// The descriptor chosen so far, if [`resolve`](Self::resolve) succeeded.
    pub fn cached(&self) -> Option<&ModelDescriptor> {
        self.cached.get()
    }

    /// Resolve the run's model, listing at most once.
    ///
    /// Fails with [`PipelineError::AuthError`] when the credential is blank or
    /// rejected. When listing offers nothing usable the fallback model is used
    /// if [`ModelPolicy::fallback_on_empty`] is set; when listing fails for
    /// another reason it is used only if [`ModelPolicy::fallback_on_error`] is
    /// set. Otherwise both cases are an `AuthError`.
    pub async fn resolve(&self, credential: &Credential) -> Result<ModelDescriptor, PipelineError> {
        self.cached
            .get_or_try_init(|| self.lookup(credential))
            .await
            .cloned()
    }

    async fn lookup(&self, credential: &Credential) -> Result<ModelDescriptor, PipelineError> {
        if credential.is_empty() {
            return Err(self.auth_error("no credential supplied"));
        }

        if let Some(name) = &self.pinned {
            info!("Using pinned model {}", name);
            return Ok(ModelDescriptor::new(name.clone(), true));
        }

        let models = match self.backend.list_models(credential).await {
            Ok(models) => models,
            Err(BackendError::Unauthorized(detail)) => return Err(self.auth_error(detail)),
            Err(e) => {
                let reason = format!("model listing failed: {e}");
                return self.fallback(self.policy.fallback_for_error(), reason);
            }
        };
        debug!("{} advertised {} models", self.backend.name(), models.len());

        if let Some(found) = select_model(&models, &self.policy.preferred_families) {
            info!("Resolved model {}", found.name);
            return Ok(found.clone());
        }

        let reason = format!(
            "no generation-capable model matching {:?} is available to this credential",
            self.policy.preferred_families
        );
        self.fallback(self.policy.fallback_for_empty(), reason)
    }

    /// The static fallback model, or `AuthError` carrying `reason` when disabled.
    fn fallback(
        &self,
        fallback: Option<&str>,
        reason: String,
    ) -> Result<ModelDescriptor, PipelineError> {
        match fallback {
            Some(fallback) => {
                warn!("{}; falling back to {}", reason, fallback);
                Ok(ModelDescriptor::new(fallback, true))
            }
            None => Err(self.auth_error(reason)),
        }
    }

    fn auth_error(&self, detail: impl Into<String>) -> PipelineError {
        PipelineError::AuthError {
            backend: self.backend.name().to_string(),
            detail: detail.into(),
        }
    }
}

/// First generation-capable model matching the earliest preferred family.
///
/// Families are tried in priority order; within a family the backend's
/// listing order decides. An empty family list accepts any capable model.
pub fn select_model<'a>(
    models: &'a [ModelDescriptor],
    families: &[String],
) -> Option<&'a ModelDescriptor> {
    let capable = || models.iter().filter(|m| m.supports_generation);

    if families.is_empty() {
        return capable().next();
    }
    families
        .iter()
        .find_map(|family| capable().find(|m| m.name.contains(family.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationInput, GenerationOptions, RemoteAsset, UploadRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ListingOnly {
        listing: Mutex<Option<Result<Vec<ModelDescriptor>, BackendError>>>,
        calls: AtomicUsize,
    }

    impl ListingOnly {
        fn new(listing: Result<Vec<ModelDescriptor>, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                listing: Mutex::new(Some(listing)),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for ListingOnly {
        fn name(&self) -> &str {
            "listing-only"
        }

        async fn list_models(
            &self,
            _credential: &Credential,
        ) -> Result<Vec<ModelDescriptor>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.listing
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(BackendError::Protocol("listed twice".into())))
        }

        async fn upload_asset(
            &self,
            _: &Credential,
            _: UploadRequest<'_>,
        ) -> Result<RemoteAsset, BackendError> {
            unreachable!()
        }

        async fn poll_asset(&self, _: &Credential, _: &str) -> Result<RemoteAsset, BackendError> {
            unreachable!()
        }

        async fn generate(
            &self,
            _: &Credential,
            _: &ModelDescriptor,
            _: &GenerationInput,
            _: &str,
            _: &GenerationOptions,
        ) -> Result<String, BackendError> {
            unreachable!()
        }
    }

    fn key() -> Credential {
        Credential::new("k")
    }

    fn listed() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::new("models/embedding-001", false),
            ModelDescriptor::new("models/gemini-1.5-pro", true),
            ModelDescriptor::new("models/gemini-1.5-flash-8b", true),
            ModelDescriptor::new("models/gemini-2.0-flash", true),
        ]
    }

    #[test]
    fn selection_follows_family_priority() {
        let models = listed();
        let policy = ModelPolicy::default();
        let chosen = select_model(&models, &policy.preferred_families).unwrap();
        assert_eq!(chosen.name, "models/gemini-2.0-flash");
    }

    #[test]
    fn selection_skips_non_generative_models() {
        let models = vec![
            ModelDescriptor::new("models/flash-embed", false),
            ModelDescriptor::new("models/other", true),
        ];
        assert!(select_model(&models, &["flash".to_string()]).is_none());
        assert_eq!(select_model(&models, &[]).unwrap().name, "models/other");
    }

    #[tokio::test]
    async fn resolves_once_per_run() {
        let backend = ListingOnly::new(Ok(listed()));
        let resolver = ModelResolver::new(backend.clone(), ModelPolicy::default());

        let first = resolver.resolve(&key()).await.unwrap();
        let second = resolver.resolve(&key()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached(), Some(&first));
    }

    #[tokio::test]
    async fn empty_match_uses_fallback_when_enabled() {
        let backend = ListingOnly::new(Ok(vec![]));
        let resolver = ModelResolver::new(backend, ModelPolicy::default());
        let model = resolver.resolve(&key()).await.unwrap();
        assert_eq!(model.name, "models/gemini-1.5-flash");
    }

    #[tokio::test]
    async fn empty_match_without_fallback_is_auth_error() {
        let backend = ListingOnly::new(Ok(vec![]));
        let resolver = ModelResolver::new(backend, ModelPolicy::default().without_fallback());
        let err = resolver.resolve(&key()).await.unwrap_err();
        assert!(matches!(err, PipelineError::AuthError { .. }));
    }

    #[tokio::test]
    async fn rejected_credential_is_auth_error_even_with_fallback() {
        let backend = ListingOnly::new(Err(BackendError::Unauthorized("API key not valid".into())));
        let resolver = ModelResolver::new(backend, ModelPolicy::default());
        match resolver.resolve(&key()).await {
            Err(PipelineError::AuthError { backend, detail }) => {
                assert_eq!(backend, "listing-only");
                assert!(detail.contains("API key not valid"));
            }
            other => panic!("expected AuthError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn listing_error_is_auth_error_by_default() {
        let backend = ListingOnly::new(Err(BackendError::Transport("connection reset".into())));
        let resolver = ModelResolver::new(backend, ModelPolicy::default());
        match resolver.resolve(&key()).await {
            Err(PipelineError::AuthError { detail, .. }) => {
                assert!(detail.contains("connection reset"))
            }
            other => panic!("expected AuthError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn listing_error_falls_back_only_when_enabled() {
        let refused = || Err(BackendError::Rejected("listing not permitted".into()));

        let backend = ListingOnly::new(refused());
        let policy = ModelPolicy::default().with_fallback_on_error();
        let resolver = ModelResolver::new(backend, policy);
        assert_eq!(resolver.resolve(&key()).await.unwrap().name, "models/gemini-1.5-flash");

        let backend = ListingOnly::new(refused());
        let policy = ModelPolicy::default().with_fallback_on_error().without_fallback();
        let resolver = ModelResolver::new(backend, policy);
        match resolver.resolve(&key()).await {
            Err(PipelineError::AuthError { detail, .. }) => {
                assert!(detail.contains("listing not permitted"))
            }
            other => panic!("expected AuthError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_credential_and_pinned_model_skip_listing() {
        let backend = ListingOnly::new(Ok(listed()));
        let resolver = ModelResolver::new(backend.clone(), ModelPolicy::default());
        assert!(resolver.resolve(&Credential::new("  ")).await.is_err());

        let pinned = ModelResolver::new(backend.clone(), ModelPolicy::default())
            .with_pinned_model(Some("models/custom".into()));
        assert_eq!(pinned.resolve(&key()).await.unwrap().name, "models/custom");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
