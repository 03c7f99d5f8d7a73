mod settings;
mod summarizer;

use std::io::Write as _;
use std::sync::{Arc, Mutex};

use magpie_chat::{
    Assistant, ChatCommand, ChatEvent, ChatHandle, ChatOrchestrator, ContextEstimate, FsImageSink,
    Message, MessageKind, MessageStatus, NoopSummarizer, Role, Topic, TopicSummarizer, factory,
};
use magpie_llm::{
    LlmProvider, ProviderMessage, ProviderStreamHandle, Role as ProviderRole, StreamEventPayload,
    StreamRequest, StreamTarget, resolve_provider,
};
use magpie_storage::{
    AssistantId, ConversationStore, DEFAULT_TOPIC_NAME, NewTopic, SqliteStorage, TopicId,
};
use snafu::{ResultExt, Snafu};
use tokio::io::AsyncBufReadExt;

use settings::SettingsStore;
use summarizer::ProviderSummarizer;

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to open conversation storage: {source}"))]
    StorageInit {
        source: magpie_storage::StorageError,
    },
    #[snafu(display("failed to access conversation storage: {source}"))]
    StorageAccess {
        source: magpie_storage::StorageError,
    },
    #[snafu(display("failed to read shell input: {source}"))]
    ReadInput { source: std::io::Error },
}

type AppResult<T> = Result<T, AppError>;

/// Snapshot of orchestrator state mirrored through bus events; the shell
/// renders from this instead of reaching into the orchestrator.
#[derive(Default)]
struct ShellState {
    topic: Option<Topic>,
    messages: Vec<Message>,
    estimate: Option<ContextEstimate>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "magpie exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let settings_store = SettingsStore::load();
    ensure_assistant_identity(&settings_store);
    let settings = settings_store.settings();

    let database_location = settings.database_path().display().to_string();
    let storage = SqliteStorage::open(&database_location)
        .await
        .context(StorageInitSnafu)?;
    let store: Arc<dyn ConversationStore> = Arc::new(storage);

    let assistant = settings.to_assistant();
    let topic = resume_or_create_topic(store.as_ref(), &assistant)?;

    let provider: Option<Arc<dyn LlmProvider>> =
        settings.to_provider_config().and_then(|config| {
            match resolve_provider(config) {
                Ok(provider) => Some(Arc::from(provider)),
                Err(error) => {
                    tracing::warn!(error = %error, "provider unavailable; replies are disabled");
                    None
                }
            }
        });

    let summarizer: Arc<dyn TopicSummarizer> = match &provider {
        Some(provider) => Arc::new(ProviderSummarizer::new(
            Arc::clone(provider),
            provider.default_model().to_string(),
        )),
        None => Arc::new(NoopSummarizer),
    };

    let image_sink = Arc::new(FsImageSink::new(settings.export_directory()));

    let orchestrator = ChatOrchestrator::new(
        assistant.clone(),
        topic,
        Arc::clone(&store),
        summarizer,
        image_sink,
    );
    let handle = orchestrator.handle();
    let events = orchestrator.events();

    let state = Arc::new(Mutex::new(ShellState {
        topic: Some(orchestrator.topic().clone()),
        messages: orchestrator.messages().to_vec(),
        estimate: None,
    }));
    let _state_subscription = events.subscribe({
        let state = Arc::clone(&state);
        move |event| apply_event(&state, event)
    });

    tokio::spawn(orchestrator.run());

    print_banner(&state, provider.is_some());
    shell_loop(&assistant, provider, &handle, &state, store.as_ref()).await?;

    handle.dispatch(ChatCommand::Shutdown);
    Ok(())
}

/// Mints and persists the assistant identity on first run so topics stay
/// attached across restarts.
fn ensure_assistant_identity(settings_store: &SettingsStore) {
    let settings = settings_store.settings();
    if !settings.assistant.id.trim().is_empty() {
        return;
    }

    let mut updated = (*settings).clone();
    updated.assistant.id = AssistantId::new_v7().to_string();
    if let Err(error) = settings_store.update(updated) {
        tracing::warn!(error = %error, "failed to persist assistant identity");
    }
}

fn resume_or_create_topic(store: &dyn ConversationStore, assistant: &Assistant) -> AppResult<Topic> {
    let topics = store
        .list_topics(assistant.id)
        .context(StorageAccessSnafu)?;

    if let Some(latest) = topics.into_iter().next() {
        return Ok(Topic::from_record(latest));
    }

    let record = store
        .create_topic(NewTopic {
            id: TopicId::new_v7(),
            assistant_id: assistant.id,
            name: DEFAULT_TOPIC_NAME.to_string(),
        })
        .context(StorageAccessSnafu)?;
    Ok(Topic::from_record(record))
}

fn apply_event(state: &Arc<Mutex<ShellState>>, event: &ChatEvent) {
    let Ok(mut state) = state.lock() else {
        return;
    };

    match event {
        ChatEvent::SequenceChanged { messages, .. } => {
            state.messages = messages.clone();
        }
        ChatEvent::TopicActivated { topic } => {
            println!("* switched to topic '{}'", topic.name);
            state.topic = Some(topic.clone());
        }
        ChatEvent::TopicRenamed { name, .. } => {
            if let Some(topic) = state.topic.as_mut() {
                topic.name = name.clone();
            }
            println!("* topic renamed to '{name}'");
        }
        ChatEvent::ContextEstimated { estimate, .. } => {
            state.estimate = Some(*estimate);
        }
        ChatEvent::ImageExported { path, .. } => {
            println!("* image exported to {path}");
        }
        ChatEvent::ScrollToLatest { .. } => {}
    }
}

fn print_banner(state: &Arc<Mutex<ShellState>>, provider_configured: bool) {
    let topic_name = state
        .lock()
        .ok()
        .and_then(|state| state.topic.as_ref().map(|topic| topic.name.clone()))
        .unwrap_or_else(|| DEFAULT_TOPIC_NAME.to_string());

    println!("magpie - topic '{topic_name}'");
    if !provider_configured {
        println!("no provider API key configured; messages persist but replies are disabled");
    }
    println!("type a message, or /help for commands");
}

async fn shell_loop(
    assistant: &Assistant,
    provider: Option<Arc<dyn LlmProvider>>,
    handle: &ChatHandle,
    state: &Arc<Mutex<ShellState>>,
    store: &dyn ConversationStore,
) -> AppResult<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut session_counter: u64 = 0;

    loop {
        // Give the orchestrator a beat to process queued commands so the
        // prompt lands after its event output.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        prompt();

        let Some(line) = lines.next_line().await.context(ReadInputSnafu)? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command_line) = input.strip_prefix('/') {
            if !handle_slash_command(command_line, assistant, &provider, handle, state, store) {
                break;
            }
        } else {
            session_counter += 1;
            send_chat_message(input, assistant, &provider, handle, state, session_counter).await;
        }
    }

    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Returns false when the shell should exit.
fn handle_slash_command(
    command_line: &str,
    assistant: &Assistant,
    provider: &Option<Arc<dyn LlmProvider>>,
    handle: &ChatHandle,
    state: &Arc<Mutex<ShellState>>,
    store: &dyn ConversationStore,
) -> bool {
    let mut parts = command_line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let argument = parts.next();

    match command {
        "help" => print_help(),
        "quit" | "exit" => return false,
        "topics" => list_topics(store, assistant, state),
        "new" => match store.create_topic(NewTopic {
            id: TopicId::new_v7(),
            assistant_id: assistant.id,
            name: DEFAULT_TOPIC_NAME.to_string(),
        }) {
            Ok(record) => {
                handle.dispatch(ChatCommand::LoadTopic {
                    topic_id: record.id,
                });
            }
            Err(error) => println!("failed to create topic: {error}"),
        },
        "load" => match argument.and_then(|raw| raw.parse::<usize>().ok()) {
            Some(index) => load_topic_by_index(index, store, assistant, handle),
            None => println!("usage: /load <topic-number> (see /topics)"),
        },
        "branch" => match argument.and_then(|raw| raw.parse::<usize>().ok()) {
            Some(index) => {
                handle.dispatch(ChatCommand::Branch { index });
            }
            None => println!("usage: /branch <messages-from-the-end>"),
        },
        "clear" => {
            handle.dispatch(ChatCommand::ClearContext);
        }
        "wipe" => {
            handle.dispatch(ChatCommand::ClearMessages);
        }
        "regen" => {
            let model_id = argument
                .map(str::to_string)
                .or_else(|| assistant.default_model.clone())
                .or_else(|| {
                    provider
                        .as_ref()
                        .map(|provider| provider.default_model().to_string())
                });
            match model_id {
                Some(model_id) => {
                    handle.dispatch(ChatCommand::Regenerate { model_id });
                }
                None => println!("no model configured to regenerate with"),
            }
        }
        "history" => print_history(state),
        "delete" => match argument.and_then(|raw| raw.parse::<usize>().ok()) {
            Some(index) => delete_by_index(index, handle, state),
            None => println!("usage: /delete <message-number> (see /history)"),
        },
        "status" => print_status(state),
        _ => println!("unknown command '/{command}'; try /help"),
    }

    true
}

fn print_help() {
    println!(
        "commands:\n  \
         /topics            list this assistant's topics\n  \
         /new               start a fresh topic\n  \
         /load <n>          switch to topic n from /topics\n  \
         /branch <i>        branch off, keeping all but the last i messages\n  \
         /clear             insert (or undo) a context-reset marker\n  \
         /wipe              delete the whole topic history\n  \
         /regen [model]     re-send the last user message\n  \
         /history           show the active topic's messages\n  \
         /delete <n>        delete message n from /history\n  \
         /status            show topic name and context estimate\n  \
         /quit              exit"
    );
}

fn list_topics(
    store: &dyn ConversationStore,
    assistant: &Assistant,
    state: &Arc<Mutex<ShellState>>,
) {
    let active_topic_id = state
        .lock()
        .ok()
        .and_then(|state| state.topic.as_ref().map(|topic| topic.id));

    match store.list_topics(assistant.id) {
        Ok(topics) if topics.is_empty() => println!("no topics yet"),
        Ok(topics) => {
            for (index, topic) in topics.iter().enumerate() {
                let marker = if Some(topic.id) == active_topic_id {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {index}: {}", topic.name);
            }
        }
        Err(error) => println!("failed to list topics: {error}"),
    }
}

fn load_topic_by_index(
    index: usize,
    store: &dyn ConversationStore,
    assistant: &Assistant,
    handle: &ChatHandle,
) {
    match store.list_topics(assistant.id) {
        Ok(topics) => match topics.get(index) {
            Some(topic) => {
                handle.dispatch(ChatCommand::LoadTopic { topic_id: topic.id });
            }
            None => println!("no topic {index}; see /topics"),
        },
        Err(error) => println!("failed to list topics: {error}"),
    }
}

fn print_history(state: &Arc<Mutex<ShellState>>) {
    let Ok(state) = state.lock() else {
        return;
    };

    if state.messages.is_empty() {
        println!("(empty topic)");
        return;
    }

    for (index, message) in state.messages.iter().enumerate() {
        if message.is_clear_marker() {
            println!("  {index}: ---- context cleared ----");
            continue;
        }

        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        let status = match message.status {
            MessageStatus::Success => "",
            MessageStatus::Sending => " [sending]",
            MessageStatus::Pending => " [pending]",
            MessageStatus::Paused => " [paused]",
            MessageStatus::Error => " [error]",
        };
        println!("  {index}: {speaker}{status}: {}", message.content);
    }
}

fn delete_by_index(index: usize, handle: &ChatHandle, state: &Arc<Mutex<ShellState>>) {
    let message_id = state
        .lock()
        .ok()
        .and_then(|state| state.messages.get(index).map(|message| message.id));

    match message_id {
        Some(message_id) => {
            handle.dispatch(ChatCommand::DeleteMessage { message_id });
        }
        None => println!("no message {index}; see /history"),
    }
}

fn print_status(state: &Arc<Mutex<ShellState>>) {
    let Ok(state) = state.lock() else {
        return;
    };

    if let Some(topic) = &state.topic {
        println!("topic: '{}' ({} messages)", topic.name, state.messages.len());
    }
    if let Some(estimate) = state.estimate {
        println!(
            "estimated tokens: {} / context messages: {}",
            estimate.token_count, estimate.context_message_count
        );
    }
}

async fn send_chat_message(
    content: &str,
    assistant: &Assistant,
    provider: &Option<Arc<dyn LlmProvider>>,
    handle: &ChatHandle,
    state: &Arc<Mutex<ShellState>>,
    session_id: u64,
) {
    let Some(topic) = state.lock().ok().and_then(|state| state.topic.clone()) else {
        return;
    };

    let mut user_message = factory::user_message(assistant, &topic, MessageKind::Text);
    user_message.content = content.to_string();

    handle.dispatch(ChatCommand::Send {
        message: user_message.clone(),
    });

    // The bus subscription mirrors the post-send sequence into the shared
    // snapshot; wait for it so the placeholder identity is known.
    let Some(sequence) = wait_for_placeholder(state, user_message.id).await else {
        tracing::warn!("send was not reflected in the sequence; skipping the reply");
        return;
    };
    let Some(placeholder) = sequence.last().cloned() else {
        return;
    };

    let mut finalized_user = user_message;
    finalized_user.status = MessageStatus::Success;
    handle.dispatch(ChatCommand::UpdateMessage {
        message: finalized_user,
    });

    let Some(provider) = provider else {
        // The placeholder stays pending; the banner already said why.
        return;
    };

    let model_id = placeholder
        .model_id
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());
    let context = context_window(
        &sequence[..sequence.len() - 1],
        assistant.settings.context_count,
    );
    let target = StreamTarget::new(topic.id.as_uuid(), session_id);

    let mut request = StreamRequest::new(target, model_id, context)
        .with_temperature(assistant.settings.temperature);
    if !assistant.prompt.trim().is_empty() {
        request = request.with_preamble(assistant.prompt.clone());
    }
    if let Some(max_tokens) = assistant.settings.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let outcome = if assistant.settings.stream_output {
        drive_stream(provider.as_ref(), request).await
    } else {
        drive_one_shot(provider.as_ref(), request).await
    };

    let mut finalized = placeholder;
    match outcome {
        Ok(reply) => {
            finalized.content = reply;
            finalized.status = MessageStatus::Success;
            handle.dispatch(ChatCommand::UpdateMessage { message: finalized });
            handle.dispatch(ChatCommand::Received { topic_id: topic.id });
        }
        Err(partial) => {
            finalized.content = partial;
            finalized.status = MessageStatus::Error;
            handle.dispatch(ChatCommand::UpdateMessage { message: finalized });
        }
    }
}

async fn wait_for_placeholder(
    state: &Arc<Mutex<ShellState>>,
    user_message_id: magpie_storage::MessageId,
) -> Option<Vec<Message>> {
    for _ in 0..200 {
        let snapshot = state
            .lock()
            .ok()
            .map(|state| state.messages.clone())
            .unwrap_or_default();

        let sent = snapshot
            .iter()
            .any(|message| message.id == user_message_id);
        let placeholder_ready = snapshot.last().is_some_and(|message| {
            message.role == Role::Assistant && message.status == MessageStatus::Pending
        });
        if sent && placeholder_ready {
            return Some(snapshot);
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    None
}

/// Streams the reply to stdout; returns the collected text, or the partial
/// text as `Err` when the stream failed.
async fn drive_stream(
    provider: &dyn LlmProvider,
    request: StreamRequest,
) -> Result<String, String> {
    let ProviderStreamHandle { mut stream, worker } = match provider.stream_chat(request) {
        Ok(handle) => handle,
        Err(error) => {
            println!("request failed: {error}");
            return Err(String::new());
        }
    };

    tokio::spawn(worker);

    let mut collected = String::new();
    let mut failed = false;
    while let Some(event) = stream.recv().await {
        match event.payload {
            StreamEventPayload::Delta(chunk) => {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
                collected.push_str(&chunk);
            }
            StreamEventPayload::ReasoningDelta(_) => {}
            StreamEventPayload::Done => break,
            StreamEventPayload::Error(message) => {
                println!();
                println!("stream failed: {message}");
                failed = true;
                break;
            }
        }
    }
    println!();

    if failed { Err(collected) } else { Ok(collected) }
}

async fn drive_one_shot(
    provider: &dyn LlmProvider,
    request: StreamRequest,
) -> Result<String, String> {
    let completion = magpie_llm::CompletionRequest {
        model_id: request.model_id,
        messages: request.messages,
        preamble: request.preamble,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };

    match provider.complete(completion).await {
        Ok(reply) => {
            println!("{reply}");
            Ok(reply)
        }
        Err(error) => {
            println!("request failed: {error}");
            Err(String::new())
        }
    }
}

/// Maps the messages after the most recent clear marker into provider turns,
/// bounded by the assistant's context size.
fn context_window(messages: &[Message], context_count: usize) -> Vec<ProviderMessage> {
    let window = messages
        .iter()
        .rev()
        .take_while(|message| !message.is_clear_marker())
        .take(context_count)
        .collect::<Vec<_>>();

    window
        .into_iter()
        .rev()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| {
            let role = match message.role {
                Role::User => ProviderRole::User,
                Role::Assistant => ProviderRole::Assistant,
            };
            ProviderMessage::new(role, message.content.clone())
        })
        .collect()
}
