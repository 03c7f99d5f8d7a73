use std::sync::Arc;

use magpie_chat::{Assistant, BoxFuture, Message, Role, TopicSummarizer};
use magpie_llm::{CompletionRequest, LlmProvider, ProviderMessage, Role as ProviderRole};

const SUMMARY_PREAMBLE: &str = "Summarize this conversation as a short topic title of at most \
ten words. Reply with the title only, in the language of the conversation.";
const SUMMARY_MAX_TOKENS: u64 = 64;

/// Topic summarizer backed by the configured provider's one-shot completion.
pub struct ProviderSummarizer {
    provider: Arc<dyn LlmProvider>,
    model_id: String,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    fn provider_messages(messages: &[Message]) -> Vec<ProviderMessage> {
        messages
            .iter()
            .filter(|message| !message.is_clear_marker() && !message.content.trim().is_empty())
            .map(|message| {
                let role = match message.role {
                    Role::User => ProviderRole::User,
                    Role::Assistant => ProviderRole::Assistant,
                };
                ProviderMessage::new(role, message.content.clone())
            })
            .collect()
    }
}

impl TopicSummarizer for ProviderSummarizer {
    fn summarize<'a>(
        &'a self,
        messages: &'a [Message],
        _assistant: &'a Assistant,
    ) -> BoxFuture<'a, Option<String>> {
        let provider_messages = Self::provider_messages(messages);

        Box::pin(async move {
            if provider_messages.is_empty() {
                return None;
            }

            let request = CompletionRequest::new(self.model_id.clone(), provider_messages)
                .with_preamble(SUMMARY_PREAMBLE)
                .with_max_tokens(SUMMARY_MAX_TOKENS);

            match self.provider.complete(request).await {
                Ok(summary) => {
                    let summary = summary.trim().to_string();
                    if summary.is_empty() { None } else { Some(summary) }
                }
                Err(error) => {
                    tracing::warn!(
                        provider_id = %self.provider.id(),
                        model_id = %self.model_id,
                        error = %error,
                        "topic summarization failed"
                    );
                    None
                }
            }
        })
    }
}
