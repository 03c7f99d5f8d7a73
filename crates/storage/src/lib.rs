pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{AssistantId, FileId, MessageId, TopicId};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{
    DEFAULT_TOPIC_NAME, FileRecord, ImageRef, MessageKind, MessageRecord, MessageRole,
    MessageStatus, NewTopic, TopicPatch, TopicRecord, UsageRecord,
};

pub trait TopicStore: Send + Sync {
    fn create_topic(&self, input: NewTopic) -> StorageResult<TopicRecord>;
    fn get_topic(&self, topic_id: TopicId) -> StorageResult<Option<TopicRecord>>;
    fn list_topics(&self, assistant_id: AssistantId) -> StorageResult<Vec<TopicRecord>>;
    fn update_topic(&self, topic_id: TopicId, patch: TopicPatch) -> StorageResult<TopicRecord>;
    fn delete_topic(&self, topic_id: TopicId) -> StorageResult<()>;
}

pub trait MessageStore: Send + Sync {
    fn get_messages(&self, topic_id: TopicId) -> StorageResult<Vec<MessageRecord>>;
    fn replace_messages(
        &self,
        topic_id: TopicId,
        messages: &[MessageRecord],
    ) -> StorageResult<()>;
    fn clear_messages(&self, topic_id: TopicId) -> StorageResult<()>;
}

pub trait FileStore: Send + Sync {
    fn get_file(&self, file_id: FileId) -> StorageResult<Option<FileRecord>>;
    fn upsert_file(&self, file: FileRecord) -> StorageResult<()>;
    /// Increments the shared reference count and returns the new count.
    fn retain_file(&self, file_id: FileId) -> StorageResult<u32>;
    /// Decrements the shared reference count. Returns the remaining count,
    /// or `None` once the count reached zero and the record was removed.
    fn release_file(&self, file_id: FileId) -> StorageResult<Option<u32>>;
}

pub trait ConversationStore: TopicStore + MessageStore + FileStore {}

impl<T> ConversationStore for T where T: TopicStore + MessageStore + FileStore {}
