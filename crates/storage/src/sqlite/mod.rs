use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    InvariantViolationSnafu, NotFoundSnafu, PayloadDecodeSnafu, PayloadEncodeSnafu,
    SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu,
};
use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, StorageResult,
};
use super::ids::{AssistantId, FileId, MessageId, TopicId};
use super::types::{
    FileRecord, ImageRef, MessageKind, MessageRecord, MessageRole, MessageStatus, NewTopic,
    TopicPatch, TopicRecord, UsageRecord,
};
use super::{FileStore, MessageStore, TopicStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single connection keeps whole-sequence rewrites serialized and lets
        // `sqlite::memory:` databases retain their schema across store calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        Ok(Self { pool })
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl TopicStore for SqliteStorage {
    fn create_topic(&self, input: NewTopic) -> StorageResult<TopicRecord> {
        let pool = self.pool.clone();
        self.run_db_call("topic-create", async move {
            let now = unix_timestamp_seconds();

            sqlx::query(
                "INSERT INTO topics (id, assistant_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(input.id.to_string())
            .bind(input.assistant_id.to_string())
            .bind(input.name.clone())
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "topic-create-insert",
            })?;

            Ok(TopicRecord {
                id: input.id,
                assistant_id: input.assistant_id,
                name: input.name,
                created_at_unix_seconds: i64_to_u64(now, "topic-create-created-at")?,
                updated_at_unix_seconds: i64_to_u64(now, "topic-create-updated-at")?,
            })
        })
    }

    fn get_topic(&self, topic_id: TopicId) -> StorageResult<Option<TopicRecord>> {
        let pool = self.pool.clone();
        self.run_db_call("topic-get", async move {
            let row = sqlx::query_as::<_, TopicRow>(
                "SELECT id, assistant_id, name, created_at, updated_at FROM topics WHERE id = ?",
            )
            .bind(topic_id.to_string())
            .fetch_optional(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "topic-get-query",
            })?;

            row.map(topic_row_to_record).transpose()
        })
    }

    fn list_topics(&self, assistant_id: AssistantId) -> StorageResult<Vec<TopicRecord>> {
        let pool = self.pool.clone();
        self.run_db_call("topic-list", async move {
            let rows = sqlx::query_as::<_, TopicRow>(
                "SELECT id, assistant_id, name, created_at, updated_at FROM topics \
                 WHERE assistant_id = ? ORDER BY updated_at DESC, id DESC",
            )
            .bind(assistant_id.to_string())
            .fetch_all(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "topic-list-query",
            })?;

            rows.into_iter().map(topic_row_to_record).collect()
        })
    }

    fn update_topic(&self, topic_id: TopicId, patch: TopicPatch) -> StorageResult<TopicRecord> {
        let pool = self.pool.clone();
        self.run_db_call("topic-update", async move {
            let now = unix_timestamp_seconds();
            let update_result =
                sqlx::query("UPDATE topics SET name = COALESCE(?, name), updated_at = ? WHERE id = ?")
                    .bind(patch.name)
                    .bind(now)
                    .bind(topic_id.to_string())
                    .execute(&pool)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "topic-update-apply",
                    })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "topic-update-missing",
                    entity: "topic",
                    id: topic_id.to_string(),
                }
                .fail();
            }

            let row = sqlx::query_as::<_, TopicRow>(
                "SELECT id, assistant_id, name, created_at, updated_at FROM topics WHERE id = ?",
            )
            .bind(topic_id.to_string())
            .fetch_optional(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "topic-update-load",
            })?
            .context(NotFoundSnafu {
                stage: "topic-update-load-missing",
                entity: "topic",
                id: topic_id.to_string(),
            })?;

            topic_row_to_record(row)
        })
    }

    fn delete_topic(&self, topic_id: TopicId) -> StorageResult<()> {
        let pool = self.pool.clone();
        self.run_db_call("topic-delete", async move {
            let mut tx = pool.begin().await.context(SqliteQuerySnafu {
                stage: "topic-delete-begin",
            })?;

            sqlx::query("DELETE FROM messages WHERE topic_id = ?")
                .bind(topic_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "topic-delete-messages",
                })?;

            let deleted = sqlx::query("DELETE FROM topics WHERE id = ?")
                .bind(topic_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "topic-delete-topic",
                })?;

            if deleted.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "topic-delete-missing",
                    entity: "topic",
                    id: topic_id.to_string(),
                }
                .fail();
            }

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "topic-delete-commit",
            })
        })
    }
}

impl MessageStore for SqliteStorage {
    fn get_messages(&self, topic_id: TopicId) -> StorageResult<Vec<MessageRecord>> {
        let pool = self.pool.clone();
        self.run_db_call("message-list", async move {
            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, topic_id, assistant_id, role, kind, status, content, model_id, \
                 is_preset, created_at, file_ids_json, images_json, usage_json \
                 FROM messages WHERE topic_id = ? ORDER BY seq ASC",
            )
            .bind(topic_id.to_string())
            .fetch_all(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }

    fn replace_messages(
        &self,
        topic_id: TopicId,
        messages: &[MessageRecord],
    ) -> StorageResult<()> {
        let pool = self.pool.clone();
        let messages = messages.to_vec();
        self.run_db_call("message-replace", async move {
            let mut tx = pool.begin().await.context(SqliteQuerySnafu {
                stage: "message-replace-begin",
            })?;

            let topic_exists =
                sqlx::query_scalar::<_, i64>("SELECT 1 FROM topics WHERE id = ? LIMIT 1")
                    .bind(topic_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "message-replace-topic-exists",
                    })?;
            if topic_exists.is_none() {
                return NotFoundSnafu {
                    stage: "message-replace-missing-topic",
                    entity: "topic",
                    id: topic_id.to_string(),
                }
                .fail();
            }

            sqlx::query("DELETE FROM messages WHERE topic_id = ?")
                .bind(topic_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-replace-delete",
                })?;

            // The whole ordered sequence is rewritten in one transaction so readers
            // never observe a partially applied history.
            for (index, message) in messages.iter().enumerate() {
                let file_ids_json = encode_file_ids(&message.file_ids)?;
                let images_json =
                    serde_json::to_string(&message.images).context(PayloadEncodeSnafu {
                        stage: "message-replace-encode-images",
                        payload: "images",
                    })?;
                let usage_json = message
                    .usage
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .context(PayloadEncodeSnafu {
                        stage: "message-replace-encode-usage",
                        payload: "usage",
                    })?;

                sqlx::query(
                    "INSERT INTO messages (id, topic_id, assistant_id, seq, role, kind, status, \
                     content, model_id, is_preset, created_at, file_ids_json, images_json, usage_json) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(message.id.to_string())
                .bind(topic_id.to_string())
                .bind(message.assistant_id.to_string())
                .bind(index as i64)
                .bind(role_to_sql(message.role))
                .bind(kind_to_sql(message.kind))
                .bind(status_to_sql(message.status))
                .bind(message.content.clone())
                .bind(message.model_id.clone())
                .bind(message.is_preset)
                .bind(u64_to_i64(
                    message.created_at_unix_seconds,
                    "message-replace-created-at",
                )?)
                .bind(file_ids_json)
                .bind(images_json)
                .bind(usage_json)
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-replace-insert",
                })?;
            }

            sqlx::query("UPDATE topics SET updated_at = ? WHERE id = ?")
                .bind(unix_timestamp_seconds())
                .bind(topic_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-replace-touch-topic",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-replace-commit",
            })
        })
    }

    fn clear_messages(&self, topic_id: TopicId) -> StorageResult<()> {
        self.replace_messages(topic_id, &[])
    }
}

impl FileStore for SqliteStorage {
    fn get_file(&self, file_id: FileId) -> StorageResult<Option<FileRecord>> {
        let pool = self.pool.clone();
        self.run_db_call("file-get", async move {
            let row = sqlx::query_as::<_, FileRow>(
                "SELECT id, name, origin_name, path, size_bytes, ext, category, created_at, ref_count \
                 FROM files WHERE id = ?",
            )
            .bind(file_id.to_string())
            .fetch_optional(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "file-get-query",
            })?;

            row.map(file_row_to_record).transpose()
        })
    }

    fn upsert_file(&self, file: FileRecord) -> StorageResult<()> {
        let pool = self.pool.clone();
        self.run_db_call("file-upsert", async move {
            sqlx::query(
                "INSERT INTO files (id, name, origin_name, path, size_bytes, ext, category, created_at, ref_count) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (id) DO UPDATE SET name = excluded.name, origin_name = excluded.origin_name, \
                 path = excluded.path, size_bytes = excluded.size_bytes, ext = excluded.ext, \
                 category = excluded.category, ref_count = excluded.ref_count",
            )
            .bind(file.id.to_string())
            .bind(file.name)
            .bind(file.origin_name)
            .bind(file.path)
            .bind(u64_to_i64(file.size_bytes, "file-upsert-size")?)
            .bind(file.ext)
            .bind(file.category)
            .bind(u64_to_i64(file.created_at_unix_seconds, "file-upsert-created-at")?)
            .bind(i64::from(file.count))
            .execute(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "file-upsert-apply",
            })?;

            Ok(())
        })
    }

    fn retain_file(&self, file_id: FileId) -> StorageResult<u32> {
        let pool = self.pool.clone();
        self.run_db_call("file-retain", async move {
            let updated = sqlx::query("UPDATE files SET ref_count = ref_count + 1 WHERE id = ?")
                .bind(file_id.to_string())
                .execute(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "file-retain-apply",
                })?;

            if updated.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "file-retain-missing",
                    entity: "file",
                    id: file_id.to_string(),
                }
                .fail();
            }

            let count = sqlx::query_scalar::<_, i64>("SELECT ref_count FROM files WHERE id = ?")
                .bind(file_id.to_string())
                .fetch_one(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "file-retain-load-count",
                })?;

            i64_to_u32(count, "file-retain-count")
        })
    }

    fn release_file(&self, file_id: FileId) -> StorageResult<Option<u32>> {
        let pool = self.pool.clone();
        self.run_db_call("file-release", async move {
            let mut tx = pool.begin().await.context(SqliteQuerySnafu {
                stage: "file-release-begin",
            })?;

            let count = sqlx::query_scalar::<_, i64>("SELECT ref_count FROM files WHERE id = ?")
                .bind(file_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "file-release-load-count",
                })?
                .context(NotFoundSnafu {
                    stage: "file-release-missing",
                    entity: "file",
                    id: file_id.to_string(),
                })?;

            let remaining = if count <= 1 {
                sqlx::query("DELETE FROM files WHERE id = ?")
                    .bind(file_id.to_string())
                    .execute(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "file-release-delete",
                    })?;
                None
            } else {
                sqlx::query("UPDATE files SET ref_count = ref_count - 1 WHERE id = ?")
                    .bind(file_id.to_string())
                    .execute(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "file-release-decrement",
                    })?;
                Some(i64_to_u32(count - 1, "file-release-remaining")?)
            };

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "file-release-commit",
            })?;

            Ok(remaining)
        })
    }
}

#[derive(Debug, FromRow)]
struct TopicRow {
    id: String,
    assistant_id: String,
    name: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    topic_id: String,
    assistant_id: String,
    role: String,
    kind: String,
    status: String,
    content: String,
    model_id: Option<String>,
    is_preset: bool,
    created_at: i64,
    file_ids_json: String,
    images_json: String,
    usage_json: Option<String>,
}

#[derive(Debug, FromRow)]
struct FileRow {
    id: String,
    name: String,
    origin_name: String,
    path: String,
    size_bytes: i64,
    ext: String,
    category: String,
    created_at: i64,
    ref_count: i64,
}

fn topic_row_to_record(row: TopicRow) -> StorageResult<TopicRecord> {
    Ok(TopicRecord {
        id: TopicId::parse(&row.id)?,
        assistant_id: AssistantId::parse(&row.assistant_id)?,
        name: row.name,
        created_at_unix_seconds: i64_to_u64(row.created_at, "topic-row-created-at")?,
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "topic-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    let images: Vec<ImageRef> =
        serde_json::from_str(&row.images_json).context(PayloadDecodeSnafu {
            stage: "message-row-decode-images",
            payload: "images",
        })?;
    let usage: Option<UsageRecord> = row
        .usage_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context(PayloadDecodeSnafu {
            stage: "message-row-decode-usage",
            payload: "usage",
        })?;

    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        topic_id: TopicId::parse(&row.topic_id)?,
        assistant_id: AssistantId::parse(&row.assistant_id)?,
        role: role_from_sql(&row.role)?,
        kind: kind_from_sql(&row.kind)?,
        status: status_from_sql(&row.status)?,
        content: row.content,
        model_id: row.model_id,
        is_preset: row.is_preset,
        created_at_unix_seconds: i64_to_u64(row.created_at, "message-row-created-at")?,
        file_ids: decode_file_ids(&row.file_ids_json)?,
        images,
        usage,
    })
}

fn file_row_to_record(row: FileRow) -> StorageResult<FileRecord> {
    Ok(FileRecord {
        id: FileId::parse(&row.id)?,
        name: row.name,
        origin_name: row.origin_name,
        path: row.path,
        size_bytes: i64_to_u64(row.size_bytes, "file-row-size")?,
        ext: row.ext,
        category: row.category,
        created_at_unix_seconds: i64_to_u64(row.created_at, "file-row-created-at")?,
        count: i64_to_u32(row.ref_count, "file-row-count")?,
    })
}

fn encode_file_ids(file_ids: &[FileId]) -> StorageResult<String> {
    let raw = file_ids
        .iter()
        .map(|file_id| file_id.to_string())
        .collect::<Vec<_>>();
    serde_json::to_string(&raw).context(PayloadEncodeSnafu {
        stage: "encode-file-ids",
        payload: "file_ids",
    })
}

fn decode_file_ids(file_ids_json: &str) -> StorageResult<Vec<FileId>> {
    let raw: Vec<String> = serde_json::from_str(file_ids_json).context(PayloadDecodeSnafu {
        stage: "decode-file-ids",
        payload: "file_ids",
    })?;
    raw.iter().map(|value| FileId::parse(value)).collect()
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn kind_to_sql(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Mention => "mention",
        MessageKind::Clear => "clear",
    }
}

fn kind_from_sql(raw: &str) -> StorageResult<MessageKind> {
    match raw {
        "text" => Ok(MessageKind::Text),
        "mention" => Ok(MessageKind::Mention),
        "clear" => Ok(MessageKind::Clear),
        _ => InvariantViolationSnafu {
            stage: "message-kind-from-sql",
            details: format!("unknown message kind '{raw}'"),
        }
        .fail(),
    }
}

fn status_to_sql(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sending => "sending",
        MessageStatus::Pending => "pending",
        MessageStatus::Success => "success",
        MessageStatus::Paused => "paused",
        MessageStatus::Error => "error",
    }
}

fn status_from_sql(raw: &str) -> StorageResult<MessageStatus> {
    match raw {
        "sending" => Ok(MessageStatus::Sending),
        "pending" => Ok(MessageStatus::Pending),
        "success" => Ok(MessageStatus::Success),
        "paused" => Ok(MessageStatus::Paused),
        "error" => Ok(MessageStatus::Error),
        _ => InvariantViolationSnafu {
            stage: "message-status-from-sql",
            details: format!("unknown message status '{raw}'"),
        }
        .fail(),
    }
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn i64_to_u32(value: i64, stage: &'static str) -> StorageResult<u32> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("sqlite integer '{value}' cannot map to u32"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_TOPIC_NAME;

    fn sample_message(
        topic_id: TopicId,
        assistant_id: AssistantId,
        content: &str,
        file_ids: Vec<FileId>,
    ) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            topic_id,
            assistant_id,
            role: MessageRole::User,
            kind: MessageKind::Text,
            status: MessageStatus::Success,
            content: content.to_string(),
            model_id: None,
            is_preset: false,
            created_at_unix_seconds: 1_700_000_000,
            file_ids,
            images: Vec::new(),
            usage: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replace_and_reload_round_trips_sequence_order() {
        let storage = SqliteStorage::open(":memory:").await.expect("open storage");
        let assistant_id = AssistantId::new_v7();
        let topic_id = TopicId::new_v7();

        storage
            .create_topic(NewTopic {
                id: topic_id,
                assistant_id,
                name: DEFAULT_TOPIC_NAME.to_string(),
            })
            .expect("create topic");

        let file_id = FileId::new_v7();
        storage
            .upsert_file(FileRecord {
                id: file_id,
                name: "notes.txt".to_string(),
                origin_name: "notes.txt".to_string(),
                path: "/tmp/notes.txt".to_string(),
                size_bytes: 12,
                ext: "txt".to_string(),
                category: "text".to_string(),
                created_at_unix_seconds: 1_700_000_000,
                count: 1,
            })
            .expect("upsert file");

        let messages = vec![
            sample_message(topic_id, assistant_id, "first", vec![file_id]),
            sample_message(topic_id, assistant_id, "second", Vec::new()),
        ];
        storage
            .replace_messages(topic_id, &messages)
            .expect("replace messages");

        let loaded = storage.get_messages(topic_id).expect("load messages");
        assert_eq!(loaded, messages);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_drops_file_row_at_zero() {
        let storage = SqliteStorage::open(":memory:").await.expect("open storage");
        let file_id = FileId::new_v7();
        storage
            .upsert_file(FileRecord {
                id: file_id,
                name: "chart.png".to_string(),
                origin_name: "chart.png".to_string(),
                path: "/tmp/chart.png".to_string(),
                size_bytes: 512,
                ext: "png".to_string(),
                category: "image".to_string(),
                created_at_unix_seconds: 1_700_000_000,
                count: 1,
            })
            .expect("upsert file");

        assert_eq!(storage.retain_file(file_id).expect("retain"), 2);
        assert_eq!(storage.release_file(file_id).expect("release"), Some(1));
        assert_eq!(storage.release_file(file_id).expect("release"), None);
        assert!(storage.get_file(file_id).expect("get file").is_none());
    }
}
