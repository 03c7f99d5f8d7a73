use rig::prelude::CompletionClient;
use rig::providers::anthropic;
use snafu::{ResultExt, ensure};

use super::model::{
    DEFAULT_ANTHROPIC_MODEL, Model, ModelCatalog, default_anthropic_models,
};
use super::provider::{
    BoxFuture, CompletionRequest, EmptyMessageSetSnafu, HttpClientSnafu, LlmProvider,
    MissingApiKeySnafu, ProviderConfig, ProviderResult, ProviderStreamHandle, ProviderWorker,
    StreamRequest, make_event_stream,
};
use super::stream::{collect_completion, run_stream_worker};

// The Messages API rejects requests without max_tokens.
const FALLBACK_MAX_TOKENS: u64 = 4_096;

pub struct AnthropicAdapter {
    config: ProviderConfig,
    fallback_models: Vec<Model>,
}

impl AnthropicAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "anthropic-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            config,
            fallback_models: default_anthropic_models(),
        })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<anthropic::Client> {
        let mut builder = anthropic::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-anthropic-client",
        })
    }
}

impl LlmProvider for AnthropicAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn default_model(&self) -> &str {
        self.config
            .default_model
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_MODEL)
    }

    fn fallback_models(&self) -> &[Model] {
        &self.fallback_models
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<ModelCatalog>> {
        // No public listing endpoint is wired here; the curated set stands in.
        Box::pin(async move {
            Ok(ModelCatalog::from_static_fallback(
                self.fallback_models.clone(),
                "anthropic adapter serves its curated model set".to_string(),
            ))
        })
    }

    fn stream_chat(&self, mut request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        if request.max_tokens.is_none() {
            request.max_tokens = Some(FALLBACK_MAX_TOKENS);
        }

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

    fn complete<'a>(
        &'a self,
        mut request: CompletionRequest,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            if request.max_tokens.is_none() {
                request.max_tokens = Some(FALLBACK_MAX_TOKENS);
            }

            let client = Self::build_client(&self.config)?;
            let model = client.completion_model(request.model_id.clone());
            collect_completion(model, request).await
        })
    }
}
