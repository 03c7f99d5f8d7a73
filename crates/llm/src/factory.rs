use super::anthropic::AnthropicAdapter;
use super::gemini::GeminiAdapter;
use super::openai::OpenAiCompatibleAdapter;
use super::provider::{LlmProvider, ProviderConfig, ProviderKind, ProviderResult};

/// Maps a provider configuration to its request adapter. Unknown provider
/// identifiers resolve to the OpenAI-compatible variant.
pub fn resolve_provider(config: ProviderConfig) -> ProviderResult<Box<dyn LlmProvider>> {
    let kind = config.kind();
    tracing::debug!(
        provider_id = %config.provider_id,
        kind = kind.as_str(),
        "resolving provider adapter"
    );

    match kind {
        ProviderKind::Anthropic => Ok(Box::new(AnthropicAdapter::new(config)?)),
        ProviderKind::Gemini => Ok(Box::new(GeminiAdapter::new(config)?)),
        ProviderKind::OpenAiCompatible => Ok(Box::new(OpenAiCompatibleAdapter::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider_id: &str) -> ProviderConfig {
        ProviderConfig::new(provider_id, "test-key", "", None)
    }

    #[test]
    fn known_identifiers_select_their_adapter() {
        let anthropic = resolve_provider(config("anthropic")).expect("anthropic adapter");
        assert_eq!(anthropic.name(), "Anthropic");

        let gemini = resolve_provider(config("gemini")).expect("gemini adapter");
        assert_eq!(gemini.name(), "Gemini");

        let openai = resolve_provider(config("openai")).expect("openai adapter");
        assert_eq!(openai.name(), "OpenAI-compatible");
    }

    #[test]
    fn unknown_identifier_falls_back_to_openai_compatible() {
        let provider = resolve_provider(config("local-llama")).expect("fallback adapter");
        assert_eq!(provider.name(), "OpenAI-compatible");
    }
}
