use crate::message::Message;

/// Rough conversion factor; close enough for a UI-facing estimate without
/// shipping a tokenizer.
const ESTIMATED_CHARS_PER_TOKEN: usize = 4;
/// Fixed per-message framing overhead (role markers, separators).
const PER_MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Derived state recomputed on every sequence change and republished as one
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextEstimate {
    /// Estimated token total for the visible history.
    pub token_count: u64,
    /// Number of most-recent messages that would enter the model context,
    /// bounded by the assistant's configured context size.
    pub context_message_count: usize,
}

pub fn estimate_tokens(content: &str) -> u64 {
    if content.is_empty() {
        return 0;
    }

    content.chars().count().div_ceil(ESTIMATED_CHARS_PER_TOKEN) as u64
}

/// Estimates tokens over the visible history and counts the context window.
///
/// Clear markers contribute nothing to the token total; the context window
/// only spans messages after the most recent clear marker, capped at
/// `context_count`.
pub fn estimate_context(messages: &[Message], context_count: usize) -> ContextEstimate {
    let token_count = messages
        .iter()
        .filter(|message| !message.is_clear_marker())
        .map(|message| estimate_tokens(&message.content) + PER_MESSAGE_OVERHEAD_TOKENS)
        .sum();

    let since_last_clear = messages
        .iter()
        .rev()
        .take_while(|message| !message.is_clear_marker())
        .count();

    ContextEstimate {
        token_count,
        context_message_count: since_last_clear.min(context_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{Assistant, Topic};
    use crate::factory;
    use crate::message::MessageKind;
    use magpie_storage::{DEFAULT_TOPIC_NAME, TopicId};

    fn fixture() -> (Assistant, Topic) {
        let assistant = Assistant::new("Helper", "");
        let topic = Topic {
            id: TopicId::new_v7(),
            assistant_id: assistant.id,
            name: DEFAULT_TOPIC_NAME.to_string(),
            created_at_unix_seconds: 0,
            updated_at_unix_seconds: 0,
        };
        (assistant, topic)
    }

    fn text_message(assistant: &Assistant, topic: &Topic, content: &str) -> Message {
        let mut message = factory::user_message(assistant, topic, MessageKind::Text);
        message.content = content.to_string();
        message
    }

    #[test]
    fn empty_content_counts_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn clear_markers_bound_the_context_window() {
        let (assistant, topic) = fixture();
        let messages = vec![
            text_message(&assistant, &topic, "old question"),
            text_message(&assistant, &topic, "old answer"),
            factory::user_message(&assistant, &topic, MessageKind::Clear),
            text_message(&assistant, &topic, "fresh question"),
        ];

        let estimate = estimate_context(&messages, 20);
        assert_eq!(estimate.context_message_count, 1);
    }

    #[test]
    fn context_count_caps_the_window() {
        let (assistant, topic) = fixture();
        let messages = (0..10)
            .map(|index| text_message(&assistant, &topic, &format!("message {index}")))
            .collect::<Vec<_>>();

        let estimate = estimate_context(&messages, 4);
        assert_eq!(estimate.context_message_count, 4);
    }

    #[test]
    fn marker_content_is_excluded_from_token_total() {
        let (assistant, topic) = fixture();
        let with_marker = vec![
            text_message(&assistant, &topic, "abcdabcd"),
            factory::user_message(&assistant, &topic, MessageKind::Clear),
        ];
        let without_marker = vec![text_message(&assistant, &topic, "abcdabcd")];

        assert_eq!(
            estimate_context(&with_marker, 20).token_count,
            estimate_context(&without_marker, 20).token_count
        );
    }
}
