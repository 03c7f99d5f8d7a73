use magpie_storage::types as storage_types;
use magpie_storage::{AssistantId, FileId, ImageRef, MessageId, MessageRecord, TopicId, UsageRecord};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
///
/// `Paused` and `Error` are terminal here; a regenerate creates a brand-new
/// message instead of transitioning an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Sending,
    Pending,
    Success,
    Paused,
    Error,
}

/// Message type tag. `Clear` rows are context-boundary markers and carry no
/// meaningful content; `Mention` marks a targeted regeneration for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Mention,
    Clear,
}

/// Core message model for the active topic sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub assistant_id: AssistantId,
    pub topic_id: TopicId,
    pub role: Role,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub content: String,
    pub model_id: Option<String>,
    pub is_preset: bool,
    pub created_at_unix_seconds: u64,
    pub files: Vec<FileId>,
    pub images: Vec<ImageRef>,
    pub usage: Option<UsageRecord>,
}

impl Message {
    pub fn is_clear_marker(&self) -> bool {
        self.kind == MessageKind::Clear
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id,
            topic_id: self.topic_id,
            assistant_id: self.assistant_id,
            role: role_to_storage(self.role),
            kind: kind_to_storage(self.kind),
            status: status_to_storage(self.status),
            content: self.content.clone(),
            model_id: self.model_id.clone(),
            is_preset: self.is_preset,
            created_at_unix_seconds: self.created_at_unix_seconds,
            file_ids: self.files.clone(),
            images: self.images.clone(),
            usage: self.usage,
        }
    }

    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            assistant_id: record.assistant_id,
            topic_id: record.topic_id,
            role: role_from_storage(record.role),
            kind: kind_from_storage(record.kind),
            status: status_from_storage(record.status),
            content: record.content,
            model_id: record.model_id,
            is_preset: record.is_preset,
            created_at_unix_seconds: record.created_at_unix_seconds,
            files: record.file_ids,
            images: record.images,
            usage: record.usage,
        }
    }
}

fn role_to_storage(role: Role) -> storage_types::MessageRole {
    match role {
        Role::User => storage_types::MessageRole::User,
        Role::Assistant => storage_types::MessageRole::Assistant,
    }
}

fn role_from_storage(role: storage_types::MessageRole) -> Role {
    match role {
        storage_types::MessageRole::User => Role::User,
        storage_types::MessageRole::Assistant => Role::Assistant,
    }
}

fn kind_to_storage(kind: MessageKind) -> storage_types::MessageKind {
    match kind {
        MessageKind::Text => storage_types::MessageKind::Text,
        MessageKind::Mention => storage_types::MessageKind::Mention,
        MessageKind::Clear => storage_types::MessageKind::Clear,
    }
}

fn kind_from_storage(kind: storage_types::MessageKind) -> MessageKind {
    match kind {
        storage_types::MessageKind::Text => MessageKind::Text,
        storage_types::MessageKind::Mention => MessageKind::Mention,
        storage_types::MessageKind::Clear => MessageKind::Clear,
    }
}

fn status_to_storage(status: MessageStatus) -> storage_types::MessageStatus {
    match status {
        MessageStatus::Sending => storage_types::MessageStatus::Sending,
        MessageStatus::Pending => storage_types::MessageStatus::Pending,
        MessageStatus::Success => storage_types::MessageStatus::Success,
        MessageStatus::Paused => storage_types::MessageStatus::Paused,
        MessageStatus::Error => storage_types::MessageStatus::Error,
    }
}

fn status_from_storage(status: storage_types::MessageStatus) -> MessageStatus {
    match status {
        storage_types::MessageStatus::Sending => MessageStatus::Sending,
        storage_types::MessageStatus::Pending => MessageStatus::Pending,
        storage_types::MessageStatus::Success => MessageStatus::Success,
        storage_types::MessageStatus::Paused => MessageStatus::Paused,
        storage_types::MessageStatus::Error => MessageStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_preserves_message() {
        let message = Message {
            id: MessageId::new_v7(),
            assistant_id: AssistantId::new_v7(),
            topic_id: TopicId::new_v7(),
            role: Role::Assistant,
            kind: MessageKind::Mention,
            status: MessageStatus::Error,
            content: "partial answer".to_string(),
            model_id: Some("gpt-4o".to_string()),
            is_preset: false,
            created_at_unix_seconds: 1_700_000_123,
            files: vec![FileId::new_v7()],
            images: vec![ImageRef {
                name: "plot.png".to_string(),
                path: "/tmp/plot.png".to_string(),
            }],
            usage: Some(UsageRecord {
                prompt_tokens: 120,
                completion_tokens: 60,
                total_tokens: 180,
            }),
        };

        assert_eq!(Message::from_record(message.to_record()), message);
    }
}
