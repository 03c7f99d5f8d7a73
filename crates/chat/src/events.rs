use magpie_storage::{MessageId, TopicId};

use crate::assistant::Topic;
use crate::estimate::ContextEstimate;
use crate::message::Message;

/// Closed command vocabulary dispatched to the orchestrator.
///
/// Each variant corresponds to one named operation of the chat lifecycle;
/// the set is checked at compile time instead of being keyed by event-name
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Append a fully-formed outgoing message plus an assistant placeholder.
    Send { message: Message },
    /// An assistant reply completed; schedules a deferred auto-rename attempt.
    Received { topic_id: TopicId },
    /// Re-send the most recent user message targeted at the given model.
    Regenerate { model_id: String },
    /// Attempt the rename guarded by default-name and message-count checks.
    /// Carries the topic captured at schedule time so stale attempts after a
    /// topic switch are discarded.
    AutoRename { topic_id: TopicId },
    /// Replace one message in place by identity, e.g. when the collaborator
    /// driving the model call finalizes a placeholder.
    UpdateMessage { message: Message },
    /// Remove exactly one message by identity.
    DeleteMessage { message_id: MessageId },
    /// Append a context-reset marker, or collapse a trailing one.
    ClearContext,
    /// Wipe the active topic's whole message sequence.
    ClearMessages,
    /// Copy the oldest `len - index` messages into a new topic and activate it.
    Branch { index: usize },
    /// Replace the in-memory sequence with the persisted one for this topic.
    LoadTopic { topic_id: TopicId },
    /// Forward image bytes to the export sink.
    ExportImage { name: String, data: Vec<u8> },
    /// Stop the command loop.
    Shutdown,
}

/// Events published after the orchestrator mutates its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The active sequence changed; carries the full ordered history.
    SequenceChanged {
        topic_id: TopicId,
        messages: Vec<Message>,
    },
    /// UI hint emitted after a send so the view follows the tail.
    ScrollToLatest { topic_id: TopicId },
    /// A different topic became active.
    TopicActivated { topic: Topic },
    /// Auto-rename applied a new display name.
    TopicRenamed { topic_id: TopicId, name: String },
    /// Single derived-state event recomputed on every sequence change.
    ContextEstimated {
        topic_id: TopicId,
        estimate: ContextEstimate,
    },
    /// The export sink wrote an image.
    ImageExported { name: String, path: String },
}
