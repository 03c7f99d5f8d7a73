use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::{NotFoundSnafu, StorageError, StorageResult};
use super::ids::{AssistantId, FileId, TopicId};
use super::types::{FileRecord, MessageRecord, NewTopic, TopicPatch, TopicRecord};
use super::{FileStore, MessageStore, TopicStore};

/// Volatile store with the same observable semantics as the sqlite backend;
/// serves as the test double wherever a `ConversationStore` is needed.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    topics: HashMap<TopicId, TopicRecord>,
    messages: HashMap<TopicId, Vec<MessageRecord>>,
    files: HashMap<FileId, FileRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, stage: &'static str) -> StorageResult<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::InvariantViolation {
                stage,
                details: "memory storage mutex poisoned".to_string(),
            })
    }
}

impl TopicStore for MemoryStorage {
    fn create_topic(&self, input: NewTopic) -> StorageResult<TopicRecord> {
        let mut inner = self.lock("memory-topic-create")?;
        let now = unix_timestamp_seconds();
        let record = TopicRecord {
            id: input.id,
            assistant_id: input.assistant_id,
            name: input.name,
            created_at_unix_seconds: now,
            updated_at_unix_seconds: now,
        };
        inner.topics.insert(record.id, record.clone());
        Ok(record)
    }

    fn get_topic(&self, topic_id: TopicId) -> StorageResult<Option<TopicRecord>> {
        let inner = self.lock("memory-topic-get")?;
        Ok(inner.topics.get(&topic_id).cloned())
    }

    fn list_topics(&self, assistant_id: AssistantId) -> StorageResult<Vec<TopicRecord>> {
        let inner = self.lock("memory-topic-list")?;
        let mut topics = inner
            .topics
            .values()
            .filter(|topic| topic.assistant_id == assistant_id)
            .cloned()
            .collect::<Vec<_>>();
        topics.sort_by(|left, right| {
            right
                .updated_at_unix_seconds
                .cmp(&left.updated_at_unix_seconds)
                .then_with(|| right.id.cmp(&left.id))
        });
        Ok(topics)
    }

    fn update_topic(&self, topic_id: TopicId, patch: TopicPatch) -> StorageResult<TopicRecord> {
        let mut inner = self.lock("memory-topic-update")?;
        let topic = inner.topics.get_mut(&topic_id).ok_or_else(|| {
            NotFoundSnafu {
                stage: "memory-topic-update-missing",
                entity: "topic",
                id: topic_id.to_string(),
            }
            .build()
        })?;

        if let Some(name) = patch.name {
            topic.name = name;
        }
        topic.updated_at_unix_seconds = unix_timestamp_seconds();
        Ok(topic.clone())
    }

    fn delete_topic(&self, topic_id: TopicId) -> StorageResult<()> {
        let mut inner = self.lock("memory-topic-delete")?;
        if inner.topics.remove(&topic_id).is_none() {
            return NotFoundSnafu {
                stage: "memory-topic-delete-missing",
                entity: "topic",
                id: topic_id.to_string(),
            }
            .fail();
        }
        inner.messages.remove(&topic_id);
        Ok(())
    }
}

impl MessageStore for MemoryStorage {
    fn get_messages(&self, topic_id: TopicId) -> StorageResult<Vec<MessageRecord>> {
        let inner = self.lock("memory-message-list")?;
        Ok(inner.messages.get(&topic_id).cloned().unwrap_or_default())
    }

    fn replace_messages(
        &self,
        topic_id: TopicId,
        messages: &[MessageRecord],
    ) -> StorageResult<()> {
        let mut inner = self.lock("memory-message-replace")?;
        let topic = inner.topics.get_mut(&topic_id).ok_or_else(|| {
            NotFoundSnafu {
                stage: "memory-message-replace-missing-topic",
                entity: "topic",
                id: topic_id.to_string(),
            }
            .build()
        })?;
        topic.updated_at_unix_seconds = unix_timestamp_seconds();
        inner.messages.insert(topic_id, messages.to_vec());
        Ok(())
    }

    fn clear_messages(&self, topic_id: TopicId) -> StorageResult<()> {
        self.replace_messages(topic_id, &[])
    }
}

impl FileStore for MemoryStorage {
    fn get_file(&self, file_id: FileId) -> StorageResult<Option<FileRecord>> {
        let inner = self.lock("memory-file-get")?;
        Ok(inner.files.get(&file_id).cloned())
    }

    fn upsert_file(&self, file: FileRecord) -> StorageResult<()> {
        let mut inner = self.lock("memory-file-upsert")?;
        inner.files.insert(file.id, file);
        Ok(())
    }

    fn retain_file(&self, file_id: FileId) -> StorageResult<u32> {
        let mut inner = self.lock("memory-file-retain")?;
        let file = inner.files.get_mut(&file_id).ok_or_else(|| {
            NotFoundSnafu {
                stage: "memory-file-retain-missing",
                entity: "file",
                id: file_id.to_string(),
            }
            .build()
        })?;
        file.count = file.count.saturating_add(1);
        Ok(file.count)
    }

    fn release_file(&self, file_id: FileId) -> StorageResult<Option<u32>> {
        let mut inner = self.lock("memory-file-release")?;
        let count = inner
            .files
            .get(&file_id)
            .map(|file| file.count)
            .ok_or_else(|| {
                NotFoundSnafu {
                    stage: "memory-file-release-missing",
                    entity: "file",
                    id: file_id.to_string(),
                }
                .build()
            })?;

        if count <= 1 {
            inner.files.remove(&file_id);
            Ok(None)
        } else {
            if let Some(file) = inner.files.get_mut(&file_id) {
                file.count = count - 1;
            }
            Ok(Some(count - 1))
        }
    }
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageId;
    use crate::types::{DEFAULT_TOPIC_NAME, MessageKind, MessageRole, MessageStatus};

    fn new_topic(storage: &MemoryStorage, assistant_id: AssistantId) -> TopicRecord {
        storage
            .create_topic(NewTopic {
                id: TopicId::new_v7(),
                assistant_id,
                name: DEFAULT_TOPIC_NAME.to_string(),
            })
            .expect("create topic")
    }

    fn text_message(topic: &TopicRecord, content: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            topic_id: topic.id,
            assistant_id: topic.assistant_id,
            role: MessageRole::User,
            kind: MessageKind::Text,
            status: MessageStatus::Success,
            content: content.to_string(),
            model_id: None,
            is_preset: false,
            created_at_unix_seconds: 1_700_000_000,
            file_ids: Vec::new(),
            images: Vec::new(),
            usage: None,
        }
    }

    #[test]
    fn replace_messages_requires_existing_topic() {
        let storage = MemoryStorage::new();
        let missing = TopicId::new_v7();
        let error = storage
            .replace_messages(missing, &[])
            .expect_err("missing topic must fail");
        assert!(matches!(error, StorageError::NotFound { .. }));
    }

    #[test]
    fn messages_round_trip_in_order() {
        let storage = MemoryStorage::new();
        let topic = new_topic(&storage, AssistantId::new_v7());
        let messages = vec![
            text_message(&topic, "alpha"),
            text_message(&topic, "beta"),
            text_message(&topic, "gamma"),
        ];

        storage
            .replace_messages(topic.id, &messages)
            .expect("replace");
        assert_eq!(storage.get_messages(topic.id).expect("load"), messages);
    }

    #[test]
    fn rename_updates_record() {
        let storage = MemoryStorage::new();
        let topic = new_topic(&storage, AssistantId::new_v7());

        let renamed = storage
            .update_topic(
                topic.id,
                TopicPatch {
                    name: Some("Weekend Trip Planning".to_string()),
                },
            )
            .expect("rename");
        assert_eq!(renamed.name, "Weekend Trip Planning");
        assert_eq!(
            storage.get_topic(topic.id).expect("get").map(|t| t.name),
            Some("Weekend Trip Planning".to_string())
        );
    }

    #[test]
    fn file_counts_follow_retain_release() {
        let storage = MemoryStorage::new();
        let file_id = FileId::new_v7();
        storage
            .upsert_file(FileRecord {
                id: file_id,
                name: "paper.pdf".to_string(),
                origin_name: "paper.pdf".to_string(),
                path: "/tmp/paper.pdf".to_string(),
                size_bytes: 2_048,
                ext: "pdf".to_string(),
                category: "document".to_string(),
                created_at_unix_seconds: 1_700_000_000,
                count: 1,
            })
            .expect("upsert");

        assert_eq!(storage.retain_file(file_id).expect("retain"), 2);
        assert_eq!(storage.release_file(file_id).expect("release"), Some(1));
        assert_eq!(storage.release_file(file_id).expect("release"), None);
        assert!(storage.get_file(file_id).expect("get").is_none());
    }
}
