use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use magpie_storage::{ConversationStore, FileId, MessageId, NewTopic, TopicId, TopicPatch};
use tokio::sync::mpsc;

use crate::assistant::{Assistant, Topic};
use crate::bus::EventBus;
use crate::estimate;
use crate::events::{ChatCommand, ChatEvent};
use crate::export::ImageSink;
use crate::factory;
use crate::message::{Message, MessageKind, Role};
use crate::summarize::TopicSummarizer;

/// Fixed delay between a completed reply and the auto-rename attempt, keeping
/// the rename off the receive path.
const AUTO_RENAME_DELAY: Duration = Duration::from_millis(800);

/// Cloneable dispatch handle for the orchestrator's command queue.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<ChatCommand>,
}

impl ChatHandle {
    pub fn dispatch(&self, command: ChatCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Owns the authoritative in-memory message sequence for one active
/// (assistant, topic) pair and keeps it consistent with the conversation
/// store and with the derived state published on the event bus.
///
/// All sequence mutation happens on the single task draining the command
/// queue; deferred work (the delayed auto-rename) re-enters through the same
/// queue instead of touching state from another task.
pub struct ChatOrchestrator {
    assistant: Assistant,
    topic: Topic,
    messages: Vec<Message>,
    store: Arc<dyn ConversationStore>,
    summarizer: Arc<dyn TopicSummarizer>,
    image_sink: Arc<dyn ImageSink>,
    events: EventBus<ChatEvent>,
    commands_tx: mpsc::UnboundedSender<ChatCommand>,
    commands_rx: mpsc::UnboundedReceiver<ChatCommand>,
    rename_delay: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        assistant: Assistant,
        topic: Topic,
        store: Arc<dyn ConversationStore>,
        summarizer: Arc<dyn TopicSummarizer>,
        image_sink: Arc<dyn ImageSink>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let messages = match store.get_messages(topic.id) {
            Ok(records) => records.into_iter().map(Message::from_record).collect(),
            Err(error) => {
                tracing::warn!(
                    topic_id = %topic.id,
                    error = %error,
                    "failed to load persisted messages; starting from an empty sequence"
                );
                Vec::new()
            }
        };

        Self {
            assistant,
            topic,
            messages,
            store,
            summarizer,
            image_sink,
            events: EventBus::new(),
            commands_tx,
            commands_rx,
            rename_delay: AUTO_RENAME_DELAY,
        }
    }

    pub fn handle(&self) -> ChatHandle {
        ChatHandle {
            commands: self.commands_tx.clone(),
        }
    }

    pub fn events(&self) -> EventBus<ChatEvent> {
        self.events.clone()
    }

    pub fn assistant(&self) -> &Assistant {
        &self.assistant
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Drains the command queue until `Shutdown`.
    pub async fn run(mut self) {
        while let Some(command) = self.commands_rx.recv().await {
            if matches!(command, ChatCommand::Shutdown) {
                tracing::debug!(topic_id = %self.topic.id, "chat orchestrator shutting down");
                break;
            }
            self.handle_command(command).await;
        }
    }

    pub async fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Send { message } => self.apply_send(message),
            ChatCommand::Received { topic_id } => self.apply_received(topic_id),
            ChatCommand::Regenerate { model_id } => self.apply_regenerate(model_id),
            ChatCommand::AutoRename { topic_id } => self.apply_auto_rename(topic_id).await,
            ChatCommand::UpdateMessage { message } => self.apply_update_message(message),
            ChatCommand::DeleteMessage { message_id } => self.apply_delete_message(message_id),
            ChatCommand::ClearContext => self.apply_clear_context(),
            ChatCommand::ClearMessages => self.apply_clear_messages(),
            ChatCommand::Branch { index } => self.apply_branch(index),
            ChatCommand::LoadTopic { topic_id } => self.apply_load_topic(topic_id),
            ChatCommand::ExportImage { name, data } => self.apply_export_image(name, data),
            ChatCommand::Shutdown => {}
        }
    }

    /// Appends the outgoing message plus a fresh assistant placeholder. Both
    /// land before the single persistence write and before any event fires,
    /// so no reader observes a sequence with only one of them.
    fn apply_send(&mut self, message: Message) {
        let placeholder = factory::assistant_placeholder(&self.assistant, &self.topic);
        self.messages.push(message);
        self.messages.push(placeholder);
        self.persist_sequence();

        self.events.publish(&ChatEvent::ScrollToLatest {
            topic_id: self.topic.id,
        });
        self.publish_sequence_events();
    }

    /// A reply completed. The rename attempt is deferred off the receive path
    /// and bound to the topic identity captured now, so an attempt that fires
    /// after a topic switch is discarded by the guard in `apply_auto_rename`.
    fn apply_received(&mut self, topic_id: TopicId) {
        let commands = self.commands_tx.clone();
        let delay = self.rename_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(ChatCommand::AutoRename { topic_id });
        });
    }

    fn apply_regenerate(&mut self, model_id: String) {
        let Some(last_user) = self
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User && !message.is_clear_marker())
        else {
            tracing::debug!(
                topic_id = %self.topic.id,
                "regenerate requested without a prior user message; ignoring"
            );
            return;
        };

        let mut resend = factory::user_message(&self.assistant, &self.topic, MessageKind::Mention);
        resend.content = last_user.content.clone();
        resend.files = last_user.files.clone();
        resend.images = last_user.images.clone();
        resend.model_id = Some(model_id);

        self.apply_send(resend);
    }

    async fn apply_auto_rename(&mut self, topic_id: TopicId) {
        if topic_id != self.topic.id {
            tracing::debug!(
                scheduled_topic_id = %topic_id,
                active_topic_id = %self.topic.id,
                "discarding auto-rename scheduled for a topic that is no longer active"
            );
            return;
        }

        // Idempotent by construction: once renamed, the name guard fails.
        if !self.topic.has_default_name() || self.messages.len() < 2 {
            return;
        }

        let Some(summary) = self
            .summarizer
            .summarize(&self.messages, &self.assistant)
            .await
        else {
            tracing::debug!(topic_id = %topic_id, "summarization produced no name; skipping rename");
            return;
        };

        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return;
        }

        match self.store.update_topic(
            topic_id,
            TopicPatch {
                name: Some(summary.clone()),
            },
        ) {
            Ok(record) => {
                self.topic = Topic::from_record(record);
                self.events.publish(&ChatEvent::TopicRenamed {
                    topic_id,
                    name: self.topic.name.clone(),
                });
            }
            Err(error) => {
                tracing::warn!(
                    topic_id = %topic_id,
                    error = %error,
                    "failed to persist auto-rename; keeping the placeholder name"
                );
            }
        }
    }

    fn apply_update_message(&mut self, message: Message) {
        let Some(slot) = self
            .messages
            .iter_mut()
            .find(|existing| existing.id == message.id)
        else {
            tracing::debug!(
                message_id = %message.id,
                "update for a message that is not in the active sequence; ignoring"
            );
            return;
        };

        *slot = message;
        self.persist_sequence();
        self.publish_sequence_events();
    }

    fn apply_delete_message(&mut self, message_id: MessageId) {
        let Some(index) = self
            .messages
            .iter()
            .position(|message| message.id == message_id)
        else {
            return;
        };

        let removed = self.messages.remove(index);
        self.persist_sequence();
        self.release_files(removed.files.iter().copied());
        self.publish_sequence_events();
    }

    /// Appends a context-reset marker. A trailing marker is removed instead,
    /// so consecutive clears collapse and an immediate re-issue acts as undo.
    fn apply_clear_context(&mut self) {
        if self.messages.is_empty() {
            return;
        }

        if self
            .messages
            .last()
            .is_some_and(Message::is_clear_marker)
        {
            self.messages.pop();
        } else {
            let marker = factory::user_message(&self.assistant, &self.topic, MessageKind::Clear);
            self.messages.push(marker);
        }

        self.persist_sequence();
        self.publish_sequence_events();
    }

    fn apply_clear_messages(&mut self) {
        if self.messages.is_empty() {
            return;
        }

        let removed = std::mem::take(&mut self.messages);
        if let Err(error) = self.store.clear_messages(self.topic.id) {
            tracing::warn!(
                topic_id = %self.topic.id,
                error = %error,
                "failed to clear persisted messages"
            );
        }

        for message in &removed {
            self.release_files(message.files.iter().copied());
        }

        self.publish_sequence_events();
    }

    /// Branches the topic at `index`, counted from the most recent message:
    /// the oldest `len - index` messages seed a new topic that inherits the
    /// display name, becomes active, and gets an auto-rename attempt.
    fn apply_branch(&mut self, index: usize) {
        let total = self.messages.len();
        if index > total {
            tracing::warn!(
                topic_id = %self.topic.id,
                index,
                total,
                "branch index exceeds sequence length; ignoring"
            );
            return;
        }

        let keep = total - index;
        let new_topic_id = TopicId::new_v7();
        let copied = self.messages[..keep]
            .iter()
            .map(|message| {
                let mut duplicate = message.clone();
                duplicate.id = MessageId::new_v7();
                duplicate.topic_id = new_topic_id;
                duplicate
            })
            .collect::<Vec<_>>();

        let record = match self.store.create_topic(NewTopic {
            id: new_topic_id,
            assistant_id: self.assistant.id,
            name: self.topic.name.clone(),
        }) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    topic_id = %self.topic.id,
                    error = %error,
                    "failed to create branched topic"
                );
                return;
            }
        };

        let records = copied.iter().map(Message::to_record).collect::<Vec<_>>();
        if let Err(error) = self.store.replace_messages(new_topic_id, &records) {
            tracing::warn!(
                topic_id = %new_topic_id,
                error = %error,
                "failed to persist branched message sequence"
            );
        }

        // The same file now appears in two topic histories; bump each distinct
        // file once, not once per referencing message.
        let mut seen = HashSet::new();
        for message in &copied {
            for file_id in &message.files {
                if seen.insert(*file_id) {
                    match self.store.retain_file(*file_id) {
                        Ok(count) => {
                            tracing::debug!(file_id = %file_id, count, "retained branched file");
                        }
                        Err(error) => {
                            tracing::warn!(
                                file_id = %file_id,
                                error = %error,
                                "failed to retain branched file"
                            );
                        }
                    }
                }
            }
        }

        self.topic = Topic::from_record(record);
        self.messages = copied;

        self.events.publish(&ChatEvent::TopicActivated {
            topic: self.topic.clone(),
        });
        self.publish_sequence_events();

        let _ = self.commands_tx.send(ChatCommand::AutoRename {
            topic_id: new_topic_id,
        });
    }

    fn apply_load_topic(&mut self, topic_id: TopicId) {
        let record = match self.store.get_topic(topic_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(topic_id = %topic_id, "cannot load unknown topic");
                return;
            }
            Err(error) => {
                tracing::warn!(topic_id = %topic_id, error = %error, "failed to load topic");
                return;
            }
        };

        self.topic = Topic::from_record(record);
        self.messages = match self.store.get_messages(topic_id) {
            Ok(records) => records.into_iter().map(Message::from_record).collect(),
            Err(error) => {
                tracing::warn!(
                    topic_id = %topic_id,
                    error = %error,
                    "failed to load persisted messages; starting from an empty sequence"
                );
                Vec::new()
            }
        };

        self.events.publish(&ChatEvent::TopicActivated {
            topic: self.topic.clone(),
        });
        self.publish_sequence_events();
    }

    fn apply_export_image(&mut self, name: String, data: Vec<u8>) {
        match self.image_sink.save_image(&name, &data) {
            Ok(path) => {
                self.events.publish(&ChatEvent::ImageExported {
                    name,
                    path: path.display().to_string(),
                });
            }
            Err(error) => {
                tracing::warn!(name = %name, error = %error, "failed to export image");
            }
        }
    }

    fn release_files(&self, file_ids: impl Iterator<Item = FileId>) {
        let mut seen = HashSet::new();
        for file_id in file_ids {
            if !seen.insert(file_id) {
                continue;
            }
            match self.store.release_file(file_id) {
                Ok(Some(count)) => {
                    tracing::debug!(file_id = %file_id, count, "released file reference");
                }
                Ok(None) => {
                    tracing::debug!(file_id = %file_id, "released final file reference");
                }
                Err(error) => {
                    tracing::warn!(file_id = %file_id, error = %error, "failed to release file");
                }
            }
        }
    }

    fn persist_sequence(&self) {
        let records = self
            .messages
            .iter()
            .map(Message::to_record)
            .collect::<Vec<_>>();
        if let Err(error) = self.store.replace_messages(self.topic.id, &records) {
            tracing::warn!(
                topic_id = %self.topic.id,
                error = %error,
                "failed to persist message sequence"
            );
        }
    }

    fn publish_sequence_events(&self) {
        self.events.publish(&ChatEvent::SequenceChanged {
            topic_id: self.topic.id,
            messages: self.messages.clone(),
        });

        let estimate =
            estimate::estimate_context(&self.messages, self.assistant.settings.context_count);
        self.events.publish(&ChatEvent::ContextEstimated {
            topic_id: self.topic.id,
            estimate,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use magpie_storage::{
        AssistantId, DEFAULT_TOPIC_NAME, FileId, FileRecord, FileStore, MemoryStorage,
        MessageRecord, MessageStore, StorageResult, TopicRecord, TopicStore,
    };

    use crate::export::{ExportResult, ImageSink};
    use crate::message::MessageStatus;
    use crate::summarize::BoxFuture;

    /// Delegating store that counts whole-sequence writes.
    struct CountingStore {
        inner: MemoryStorage,
        replace_calls: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                replace_calls: AtomicUsize::new(0),
            }
        }

        fn replace_calls(&self) -> usize {
            self.replace_calls.load(Ordering::SeqCst)
        }
    }

    impl TopicStore for CountingStore {
        fn create_topic(&self, input: NewTopic) -> StorageResult<TopicRecord> {
            self.inner.create_topic(input)
        }

        fn get_topic(&self, topic_id: TopicId) -> StorageResult<Option<TopicRecord>> {
            self.inner.get_topic(topic_id)
        }

        fn list_topics(&self, assistant_id: AssistantId) -> StorageResult<Vec<TopicRecord>> {
            self.inner.list_topics(assistant_id)
        }

        fn update_topic(&self, topic_id: TopicId, patch: TopicPatch) -> StorageResult<TopicRecord> {
            self.inner.update_topic(topic_id, patch)
        }

        fn delete_topic(&self, topic_id: TopicId) -> StorageResult<()> {
            self.inner.delete_topic(topic_id)
        }
    }

    impl MessageStore for CountingStore {
        fn get_messages(&self, topic_id: TopicId) -> StorageResult<Vec<MessageRecord>> {
            self.inner.get_messages(topic_id)
        }

        fn replace_messages(
            &self,
            topic_id: TopicId,
            messages: &[MessageRecord],
        ) -> StorageResult<()> {
            self.replace_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.replace_messages(topic_id, messages)
        }

        fn clear_messages(&self, topic_id: TopicId) -> StorageResult<()> {
            self.inner.clear_messages(topic_id)
        }
    }

    impl FileStore for CountingStore {
        fn get_file(&self, file_id: FileId) -> StorageResult<Option<FileRecord>> {
            self.inner.get_file(file_id)
        }

        fn upsert_file(&self, file: FileRecord) -> StorageResult<()> {
            self.inner.upsert_file(file)
        }

        fn retain_file(&self, file_id: FileId) -> StorageResult<u32> {
            self.inner.retain_file(file_id)
        }

        fn release_file(&self, file_id: FileId) -> StorageResult<Option<u32>> {
            self.inner.release_file(file_id)
        }
    }

    struct StaticSummarizer(Option<String>);

    impl TopicSummarizer for StaticSummarizer {
        fn summarize<'a>(
            &'a self,
            _messages: &'a [Message],
            _assistant: &'a Assistant,
        ) -> BoxFuture<'a, Option<String>> {
            let value = self.0.clone();
            Box::pin(async move { value })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<String>>,
    }

    impl ImageSink for RecordingSink {
        fn save_image(&self, name: &str, _data: &[u8]) -> ExportResult<PathBuf> {
            self.saved.lock().expect("lock").push(name.to_string());
            Ok(PathBuf::from("/tmp").join(name))
        }
    }

    fn setup_with_summary(summary: Option<&str>) -> (ChatOrchestrator, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::new());
        let assistant = Assistant::new("Helper", "You are helpful.").with_default_model("gpt-4o");
        let record = store
            .create_topic(NewTopic {
                id: TopicId::new_v7(),
                assistant_id: assistant.id,
                name: DEFAULT_TOPIC_NAME.to_string(),
            })
            .expect("create topic");
        let topic = Topic::from_record(record);

        let orchestrator = ChatOrchestrator::new(
            assistant,
            topic,
            store.clone(),
            Arc::new(StaticSummarizer(summary.map(str::to_string))),
            Arc::new(RecordingSink::default()),
        );
        (orchestrator, store)
    }

    fn setup() -> (ChatOrchestrator, Arc<CountingStore>) {
        setup_with_summary(None)
    }

    fn outgoing(orchestrator: &ChatOrchestrator, content: &str) -> Message {
        let mut message = factory::user_message(
            orchestrator.assistant(),
            orchestrator.topic(),
            MessageKind::Text,
        );
        message.content = content.to_string();
        message
    }

    fn seed_file(store: &CountingStore, count: u32) -> FileId {
        let file_id = FileId::new_v7();
        store
            .upsert_file(FileRecord {
                id: file_id,
                name: "attachment.bin".to_string(),
                origin_name: "attachment.bin".to_string(),
                path: "/tmp/attachment.bin".to_string(),
                size_bytes: 64,
                ext: "bin".to_string(),
                category: "document".to_string(),
                created_at_unix_seconds: 1_700_000_000,
                count,
            })
            .expect("seed file");
        file_id
    }

    #[tokio::test]
    async fn send_appends_pair_atomically_with_one_write() {
        let (mut orchestrator, store) = setup();
        let message = outgoing(&orchestrator, "hello there");
        let message_id = message.id;

        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;

        let messages = orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, message_id);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].status, MessageStatus::Pending);

        assert_eq!(store.replace_calls(), 1);
        let persisted = store
            .get_messages(orchestrator.topic().id)
            .expect("persisted messages");
        let expected = messages.iter().map(Message::to_record).collect::<Vec<_>>();
        assert_eq!(persisted, expected);
    }

    #[tokio::test]
    async fn clear_context_twice_restores_original_sequence() {
        let (mut orchestrator, _store) = setup();
        let message = outgoing(&orchestrator, "question");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;
        let original = orchestrator.messages().to_vec();

        orchestrator.handle_command(ChatCommand::ClearContext).await;
        assert_eq!(orchestrator.messages().len(), original.len() + 1);
        assert!(orchestrator.messages().last().expect("marker").is_clear_marker());

        orchestrator.handle_command(ChatCommand::ClearContext).await;
        assert_eq!(orchestrator.messages(), original.as_slice());
    }

    #[tokio::test]
    async fn clear_context_on_empty_history_is_noop() {
        let (mut orchestrator, store) = setup();

        orchestrator.handle_command(ChatCommand::ClearContext).await;

        assert!(orchestrator.messages().is_empty());
        assert_eq!(store.replace_calls(), 0);
    }

    #[tokio::test]
    async fn branch_copies_prefix_and_bumps_each_distinct_file_once() {
        let (mut orchestrator, store) = setup();
        let source_topic_id = orchestrator.topic().id;
        let shared_file = seed_file(&store, 1);
        let other_file = seed_file(&store, 1);
        let tail_file = seed_file(&store, 1);

        for (content, files) in [
            ("first", vec![shared_file]),
            ("second", vec![shared_file, other_file]),
            ("third", Vec::new()),
            ("fourth", vec![tail_file]),
        ] {
            let mut message = outgoing(&orchestrator, content);
            message.files = files;
            message.status = MessageStatus::Success;
            orchestrator.messages.push(message);
        }
        orchestrator.persist_sequence();

        // Index counts from the most recent message: keep the oldest 3.
        orchestrator
            .handle_command(ChatCommand::Branch { index: 1 })
            .await;

        let branched_topic = orchestrator.topic();
        assert_ne!(branched_topic.id, source_topic_id);
        assert_eq!(branched_topic.name, DEFAULT_TOPIC_NAME);
        assert_eq!(orchestrator.messages().len(), 3);
        assert!(orchestrator
            .messages()
            .iter()
            .all(|message| message.topic_id == branched_topic.id));

        let persisted = store
            .get_messages(branched_topic.id)
            .expect("branched messages");
        assert_eq!(persisted.len(), 3);
        assert_eq!(
            persisted
                .iter()
                .map(|record| record.content.as_str())
                .collect::<Vec<_>>(),
            vec!["first", "second", "third"]
        );

        // `shared_file` appears in two copied messages but is bumped once.
        assert_eq!(
            store.get_file(shared_file).expect("shared").map(|f| f.count),
            Some(2)
        );
        assert_eq!(
            store.get_file(other_file).expect("other").map(|f| f.count),
            Some(2)
        );
        assert_eq!(
            store.get_file(tail_file).expect("tail").map(|f| f.count),
            Some(1)
        );

        // The source topic keeps its full history.
        assert_eq!(
            store
                .get_messages(source_topic_id)
                .expect("source messages")
                .len(),
            4
        );
    }

    #[tokio::test]
    async fn delete_preserves_order_and_releases_files() {
        let (mut orchestrator, store) = setup();
        let file_id = seed_file(&store, 2);

        let first = outgoing(&orchestrator, "keep one");
        let mut second = outgoing(&orchestrator, "remove me");
        second.files = vec![file_id];
        let third = outgoing(&orchestrator, "keep two");
        let victim_id = second.id;

        orchestrator.messages.extend([first, second, third]);
        orchestrator.persist_sequence();

        orchestrator
            .handle_command(ChatCommand::DeleteMessage {
                message_id: victim_id,
            })
            .await;

        let contents = orchestrator
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["keep one", "keep two"]);
        assert_eq!(
            store.get_file(file_id).expect("file").map(|f| f.count),
            Some(1)
        );
    }

    #[tokio::test]
    async fn auto_rename_applies_to_state_and_store() {
        let (mut orchestrator, store) = setup_with_summary(Some("Weekend Trip Planning"));
        let message = outgoing(&orchestrator, "plan a weekend trip");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;

        let renames = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&renames);
        let events = orchestrator.events();
        let _subscription = events.subscribe(move |event| {
            if let ChatEvent::TopicRenamed { name, .. } = event {
                seen.lock().expect("lock").push(name.clone());
            }
        });

        let topic_id = orchestrator.topic().id;
        orchestrator
            .handle_command(ChatCommand::AutoRename { topic_id })
            .await;

        assert_eq!(orchestrator.topic().name, "Weekend Trip Planning");
        assert_eq!(
            store.get_topic(topic_id).expect("topic").map(|t| t.name),
            Some("Weekend Trip Planning".to_string())
        );
        assert_eq!(
            renames.lock().expect("lock").as_slice(),
            &["Weekend Trip Planning".to_string()]
        );
    }

    #[tokio::test]
    async fn auto_rename_is_noop_when_name_already_set() {
        let (mut orchestrator, store) = setup_with_summary(Some("Should Not Apply"));
        let topic_id = orchestrator.topic().id;
        store
            .update_topic(
                topic_id,
                TopicPatch {
                    name: Some("Chosen By Hand".to_string()),
                },
            )
            .expect("rename");
        orchestrator.topic.name = "Chosen By Hand".to_string();

        let message = outgoing(&orchestrator, "enough messages now");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;
        orchestrator
            .handle_command(ChatCommand::AutoRename { topic_id })
            .await;

        assert_eq!(orchestrator.topic().name, "Chosen By Hand");
    }

    #[tokio::test]
    async fn auto_rename_is_noop_below_two_messages() {
        let (mut orchestrator, store) = setup_with_summary(Some("Too Early"));
        let topic_id = orchestrator.topic().id;
        let mut only = outgoing(&orchestrator, "lonely message");
        only.status = MessageStatus::Success;
        orchestrator.messages.push(only);

        orchestrator
            .handle_command(ChatCommand::AutoRename { topic_id })
            .await;

        assert_eq!(orchestrator.topic().name, DEFAULT_TOPIC_NAME);
        assert_eq!(
            store.get_topic(topic_id).expect("topic").map(|t| t.name),
            Some(DEFAULT_TOPIC_NAME.to_string())
        );
    }

    #[tokio::test]
    async fn stale_auto_rename_for_inactive_topic_is_discarded() {
        let (mut orchestrator, store) = setup_with_summary(Some("Stale Name"));
        let first_topic_id = orchestrator.topic().id;
        let message = outgoing(&orchestrator, "hello");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;

        // Switch to a different topic before the scheduled rename fires.
        let second = store
            .create_topic(NewTopic {
                id: TopicId::new_v7(),
                assistant_id: orchestrator.assistant().id,
                name: DEFAULT_TOPIC_NAME.to_string(),
            })
            .expect("second topic");
        orchestrator
            .handle_command(ChatCommand::LoadTopic {
                topic_id: second.id,
            })
            .await;

        orchestrator
            .handle_command(ChatCommand::AutoRename {
                topic_id: first_topic_id,
            })
            .await;

        assert_eq!(
            store
                .get_topic(first_topic_id)
                .expect("first topic")
                .map(|t| t.name),
            Some(DEFAULT_TOPIC_NAME.to_string())
        );
    }

    #[tokio::test]
    async fn regenerate_resends_last_user_message_with_fresh_identity() {
        let (mut orchestrator, _store) = setup();
        let mut original = outgoing(&orchestrator, "explain lifetimes");
        original.status = MessageStatus::Success;
        let original_id = original.id;
        orchestrator.messages.push(original);
        orchestrator.persist_sequence();

        orchestrator
            .handle_command(ChatCommand::Regenerate {
                model_id: "gpt-4.1".to_string(),
            })
            .await;

        let messages = orchestrator.messages();
        assert_eq!(messages.len(), 3);

        let resend = &messages[1];
        assert_ne!(resend.id, original_id);
        assert_eq!(resend.content, "explain lifetimes");
        assert_eq!(resend.kind, MessageKind::Mention);
        assert_eq!(resend.model_id.as_deref(), Some("gpt-4.1"));
        assert_eq!(messages[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn update_message_replaces_by_identity_and_keeps_position() {
        let (mut orchestrator, store) = setup();
        let message = outgoing(&orchestrator, "question");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;

        let mut finalized = orchestrator.messages()[1].clone();
        finalized.content = "the answer".to_string();
        finalized.status = MessageStatus::Success;
        orchestrator
            .handle_command(ChatCommand::UpdateMessage {
                message: finalized.clone(),
            })
            .await;

        let messages = orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], finalized);
        assert_eq!(
            store
                .get_messages(orchestrator.topic().id)
                .expect("persisted")[1],
            finalized.to_record()
        );
    }

    #[tokio::test]
    async fn regenerate_without_user_message_is_noop() {
        let (mut orchestrator, store) = setup();
        let placeholder =
            factory::assistant_placeholder(orchestrator.assistant(), orchestrator.topic());
        orchestrator.messages.push(placeholder);

        orchestrator
            .handle_command(ChatCommand::Regenerate {
                model_id: "gpt-4o".to_string(),
            })
            .await;

        assert_eq!(orchestrator.messages().len(), 1);
        assert_eq!(store.replace_calls(), 0);
    }

    #[tokio::test]
    async fn clear_messages_wipes_history_and_releases_files() {
        let (mut orchestrator, store) = setup();
        let file_id = seed_file(&store, 1);
        let mut message = outgoing(&orchestrator, "with attachment");
        message.files = vec![file_id];
        orchestrator.messages.push(message);
        orchestrator.persist_sequence();

        orchestrator.handle_command(ChatCommand::ClearMessages).await;

        assert!(orchestrator.messages().is_empty());
        assert!(store
            .get_messages(orchestrator.topic().id)
            .expect("messages")
            .is_empty());
        assert!(store.get_file(file_id).expect("file").is_none());
    }

    #[tokio::test]
    async fn load_topic_replaces_sequence_with_persisted_one() {
        let (mut orchestrator, store) = setup();
        let message = outgoing(&orchestrator, "kept in first topic");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;

        let empty = store
            .create_topic(NewTopic {
                id: TopicId::new_v7(),
                assistant_id: orchestrator.assistant().id,
                name: DEFAULT_TOPIC_NAME.to_string(),
            })
            .expect("empty topic");

        orchestrator
            .handle_command(ChatCommand::LoadTopic { topic_id: empty.id })
            .await;
        assert!(orchestrator.messages().is_empty());
        assert_eq!(orchestrator.topic().id, empty.id);
    }

    #[tokio::test]
    async fn sequence_changes_publish_one_estimate_event() {
        let (mut orchestrator, _store) = setup();
        let estimates = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&estimates);
        let events = orchestrator.events();
        let _subscription = events.subscribe(move |event| {
            if let ChatEvent::ContextEstimated { estimate, .. } = event {
                seen.lock().expect("lock").push(*estimate);
            }
        });

        let message = outgoing(&orchestrator, "estimate me");
        orchestrator
            .handle_command(ChatCommand::Send { message })
            .await;

        let observed = estimates.lock().expect("lock");
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].context_message_count, 2);
        assert!(observed[0].token_count > 0);
    }

    #[tokio::test]
    async fn export_image_reaches_the_sink() {
        let (mut orchestrator, _store) = setup();
        let exported = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&exported);
        let events = orchestrator.events();
        let _subscription = events.subscribe(move |event| {
            if let ChatEvent::ImageExported { name, .. } = event {
                seen.lock().expect("lock").push(name.clone());
            }
        });

        orchestrator
            .handle_command(ChatCommand::ExportImage {
                name: "topic.png".to_string(),
                data: vec![1, 2, 3],
            })
            .await;

        assert_eq!(
            exported.lock().expect("lock").as_slice(),
            &["topic.png".to_string()]
        );
    }
}
