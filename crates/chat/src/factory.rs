use std::time::{SystemTime, UNIX_EPOCH};

use magpie_storage::MessageId;

use crate::assistant::{Assistant, Topic};
use crate::message::{Message, MessageKind, MessageStatus, Role};

/// Builds a fully-formed outgoing user message. `Clear`-kind messages produced
/// here act as context-boundary markers and keep empty content.
pub fn user_message(assistant: &Assistant, topic: &Topic, kind: MessageKind) -> Message {
    Message {
        id: MessageId::new_v7(),
        assistant_id: assistant.id,
        topic_id: topic.id,
        role: Role::User,
        kind,
        status: MessageStatus::Sending,
        content: String::new(),
        model_id: None,
        is_preset: false,
        created_at_unix_seconds: now_unix_seconds(),
        files: Vec::new(),
        images: Vec::new(),
        usage: None,
    }
}

/// Builds the assistant placeholder appended alongside every send; the
/// collaborator performing the model call moves it out of `Pending`.
pub fn assistant_placeholder(assistant: &Assistant, topic: &Topic) -> Message {
    Message {
        id: MessageId::new_v7(),
        assistant_id: assistant.id,
        topic_id: topic.id,
        role: Role::Assistant,
        kind: MessageKind::Text,
        status: MessageStatus::Pending,
        content: String::new(),
        model_id: assistant.default_model.clone(),
        is_preset: false,
        created_at_unix_seconds: now_unix_seconds(),
        files: Vec::new(),
        images: Vec::new(),
        usage: None,
    }
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Assistant, Topic) {
        let assistant = Assistant::new("Helper", "You are helpful.").with_default_model("gpt-4o");
        let topic = Topic {
            id: magpie_storage::TopicId::new_v7(),
            assistant_id: assistant.id,
            name: magpie_storage::DEFAULT_TOPIC_NAME.to_string(),
            created_at_unix_seconds: 0,
            updated_at_unix_seconds: 0,
        };
        (assistant, topic)
    }

    #[test]
    fn user_messages_bind_to_assistant_and_topic() {
        let (assistant, topic) = fixture();
        let message = user_message(&assistant, &topic, MessageKind::Text);

        assert_eq!(message.assistant_id, assistant.id);
        assert_eq!(message.topic_id, topic.id);
        assert_eq!(message.role, Role::User);
        assert_eq!(message.status, MessageStatus::Sending);
    }

    #[test]
    fn placeholder_starts_pending_with_default_model() {
        let (assistant, topic) = fixture();
        let placeholder = assistant_placeholder(&assistant, &topic);

        assert_eq!(placeholder.role, Role::Assistant);
        assert_eq!(placeholder.status, MessageStatus::Pending);
        assert_eq!(placeholder.model_id.as_deref(), Some("gpt-4o"));
        assert!(placeholder.content.is_empty());
    }

    #[test]
    fn clear_markers_keep_empty_content() {
        let (assistant, topic) = fixture();
        let marker = user_message(&assistant, &topic, MessageKind::Clear);

        assert!(marker.is_clear_marker());
        assert!(marker.content.is_empty());
    }
}
