use serde::{Deserialize, Serialize};

use super::ids::{AssistantId, FileId, MessageId, TopicId};

/// Default topic name used until the first successful auto-rename.
pub const DEFAULT_TOPIC_NAME: &str = "New Topic";

/// Storage-local message role, intentionally decoupled from domain-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

/// Storage-local message lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Sending,
    Pending,
    Success,
    Paused,
    Error,
}

/// Storage-local message type tag. `Clear` rows are context-boundary markers
/// and carry no meaningful content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Mention,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub id: TopicId,
    pub assistant_id: AssistantId,
    pub name: String,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    // Callers mint the id so branched topics can be assembled before the insert.
    pub id: TopicId,
    pub assistant_id: AssistantId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicPatch {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub topic_id: TopicId,
    pub assistant_id: AssistantId,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub content: String,
    pub model_id: Option<String>,
    pub is_preset: bool,
    pub created_at_unix_seconds: u64,
    pub file_ids: Vec<FileId>,
    pub images: Vec<ImageRef>,
    pub usage: Option<UsageRecord>,
}

/// Shared attachment record. `count` is the number of topic histories that
/// reference the file; the row is removed once the count reaches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    pub origin_name: String,
    pub path: String,
    pub size_bytes: u64,
    pub ext: String,
    pub category: String,
    pub created_at_unix_seconds: u64,
    pub count: u32,
}
