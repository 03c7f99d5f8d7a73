use std::future::Future;
use std::pin::Pin;

use crate::assistant::Assistant;
use crate::message::Message;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Seam for the external summarization call behind auto-rename.
///
/// Implementations return `None` for failures and empty results alike; the
/// orchestrator treats both as "skip the rename, no retry".
pub trait TopicSummarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        messages: &'a [Message],
        assistant: &'a Assistant,
    ) -> BoxFuture<'a, Option<String>>;
}

/// Summarizer that never produces a name; used where rename is not wired up.
pub struct NoopSummarizer;

impl TopicSummarizer for NoopSummarizer {
    fn summarize<'a>(
        &'a self,
        _messages: &'a [Message],
        _assistant: &'a Assistant,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(async { None })
    }
}
