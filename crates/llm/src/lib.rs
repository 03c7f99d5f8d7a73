pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod model;
pub mod openai;
pub mod provider;
mod stream;

pub use anthropic::AnthropicAdapter;
pub use factory::resolve_provider;
pub use gemini::GeminiAdapter;
pub use model::{
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL, Model, ModelCache,
    ModelCatalog, ModelCatalogSource,
};
pub use openai::OpenAiCompatibleAdapter;
pub use provider::{
    BoxFuture, CompletionRequest, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderKind, ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role,
    StreamEventMapped, StreamEventPayload, StreamRequest, StreamTarget,
};
