pub mod assistant;
pub mod bus;
pub mod estimate;
pub mod events;
pub mod export;
pub mod factory;
pub mod message;
pub mod orchestrator;
pub mod summarize;

pub use assistant::{Assistant, AssistantSettings, Topic};
pub use bus::{EventBus, Subscription};
pub use estimate::{ContextEstimate, estimate_context, estimate_tokens};
pub use events::{ChatCommand, ChatEvent};
pub use export::{ExportError, ExportResult, FsImageSink, ImageSink};
pub use message::{Message, MessageKind, MessageStatus, Role};
pub use orchestrator::{ChatHandle, ChatOrchestrator};
pub use summarize::{BoxFuture, NoopSummarizer, TopicSummarizer};
