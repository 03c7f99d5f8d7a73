use std::sync::Arc;

use rig::http_client::{self, HttpClientExt, NoBody};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use snafu::{ResultExt, ensure};

use super::model::{
    DEFAULT_OPENAI_MODEL, Model, ModelCache, ModelCatalog, default_openai_models, get_model_cache,
};
use super::provider::{
    BoxFuture, CompletionRequest, EmptyMessageSetSnafu, HttpClientSnafu, LlmProvider,
    MissingApiKeySnafu, ModelFetchStatusSnafu, ModelPayloadParseSnafu, ProviderConfig,
    ProviderError, ProviderResult, ProviderStreamHandle, ProviderWorker, StreamRequest,
    make_event_stream,
};
use super::stream::{collect_completion, run_stream_worker};

/// Adapter for OpenAI and OpenAI-compatible endpoints; this is the fallback
/// variant every unknown provider identifier resolves to.
pub struct OpenAiCompatibleAdapter {
    config: ProviderConfig,
    fallback_models: Vec<Model>,
    model_cache: Arc<ModelCache>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "openai-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            config,
            fallback_models: default_openai_models(),
            model_cache: get_model_cache(),
        })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    async fn fetch_models_from_provider(&self) -> ProviderResult<Vec<Model>> {
        let client = Self::build_client(&self.config)?;
        let request = client
            .get("/models")
            .context(HttpClientSnafu {
                stage: "build-model-request",
            })?
            .body(NoBody)
            .map_err(|source| ProviderError::BuildHttpRequestBody {
                stage: "build-model-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(request).await.context(HttpClientSnafu {
            stage: "send-model-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-model-response",
        })?;

        if !status.is_success() {
            return ModelFetchStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        let model_ids = Self::extract_model_ids(&payload);
        if model_ids.is_empty() {
            return ModelPayloadParseSnafu {
                stage: "parse-model-response",
                details: "no model identifiers found in provider response".to_string(),
            }
            .fail();
        }

        Ok(model_ids.into_iter().map(Model::from_id).collect())
    }

    fn extract_model_ids(payload: &str) -> Vec<String> {
        let mut ids = Vec::new();
        let mut cursor = payload;
        let needle = "\"id\":\"";

        // Keep the parser lightweight: extract every OpenAI-style `id` field.
        while let Some(start) = cursor.find(needle) {
            let tail = &cursor[start + needle.len()..];
            let Some(end) = tail.find('"') else {
                break;
            };

            let candidate = tail[..end].trim();
            if !candidate.is_empty() {
                ids.push(candidate.to_string());
            }
            cursor = &tail[end + 1..];
        }

        ids.sort();
        ids.dedup();
        ids
    }
}

impl LlmProvider for OpenAiCompatibleAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "OpenAI-compatible"
    }

    fn default_model(&self) -> &str {
        self.config
            .default_model
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_MODEL)
    }

    fn fallback_models(&self) -> &[Model] {
        &self.fallback_models
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<ModelCatalog>> {
        Box::pin(async move {
            if let Some(models) = self.model_cache.get_fresh(self.id()).await {
                return Ok(ModelCatalog::from_cache_fresh(models));
            }

            // Fallback order intentionally prefers availability over strict freshness:
            // provider API first, then stale cache, then static defaults.
            match self.fetch_models_from_provider().await {
                Ok(models) => {
                    self.model_cache.set(self.id(), models.clone()).await;
                    Ok(ModelCatalog::from_provider_api(models))
                }
                Err(error) => {
                    let error_message = error.to_string();

                    if let Some(models) = self.model_cache.get_any(self.id()).await {
                        tracing::warn!(
                            provider_id = %self.id(),
                            cached_model_count = models.len(),
                            error = %error_message,
                            "model fetch failed; serving stale cached models"
                        );
                        return Ok(ModelCatalog::from_cache_stale(models, error_message));
                    }

                    tracing::warn!(
                        provider_id = %self.id(),
                        fallback_model_count = self.fallback_models.len(),
                        error = %error_message,
                        "model fetch failed without cache; serving static fallback models"
                    );

                    Ok(ModelCatalog::from_static_fallback(
                        self.fallback_models.clone(),
                        error_message,
                    ))
                }
            }
        })
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        let client = Self::build_client(&self.config)?;
        let model = client.completion_model(request.model_id.clone());
        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: ProviderWorker = Box::pin(run_stream_worker(
            self.config.provider_id.clone(),
            model,
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let client = Self::build_client(&self.config)?;
            let model = client.completion_model(request.model_id.clone());
            collect_completion(model, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_dedupes_model_ids() {
        let payload = r#"{"data":[{"id":"gpt-4o"},{"id":"gpt-4o-mini"},{"id":"gpt-4o"}]}"#;
        assert_eq!(
            OpenAiCompatibleAdapter::extract_model_ids(payload),
            vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()]
        );
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = ProviderConfig::new("openai", "", "", None);
        assert!(matches!(
            OpenAiCompatibleAdapter::new(config),
            Err(ProviderError::MissingApiKey { .. })
        ));
    }
}
