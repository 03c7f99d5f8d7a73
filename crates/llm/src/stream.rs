use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::streaming::{StreamedAssistantContent, StreamingCompletionResponse};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionRequest, EmptyCompletionMessageSetSnafu, EmptyMessageSetSnafu, ProviderError,
    ProviderMessage, ProviderResult, Role, StreamEventMapped, StreamEventPayload, StreamRequest,
    StreamTarget,
};

fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
    match message.role {
        Role::System => None,
        Role::User => Some(RigMessage::user(message.content.clone())),
        Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
    }
}

// Rig exposes a single preamble field, so system-role messages are folded into it
// to preserve caller intent while still sending user/assistant turns as chat messages.
fn merged_preamble(preamble: Option<&str>, messages: &[ProviderMessage]) -> Option<String> {
    let mut preamble_parts = Vec::new();

    if let Some(preamble) = preamble
        && !preamble.trim().is_empty()
    {
        preamble_parts.push(preamble.to_string());
    }

    for message in messages {
        if matches!(message.role, Role::System) && !message.content.trim().is_empty() {
            preamble_parts.push(message.content.clone());
        }
    }

    if preamble_parts.is_empty() {
        None
    } else {
        Some(preamble_parts.join("\n\n"))
    }
}

struct OpenStreamParams<'a> {
    messages: &'a [ProviderMessage],
    preamble: Option<&'a str>,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
}

async fn open_stream<M>(
    model: M,
    params: OpenStreamParams<'_>,
) -> Result<StreamingCompletionResponse<M::StreamingResponse>, OpenStreamError>
where
    M: CompletionModel,
    M::StreamingResponse: Clone + Unpin,
{
    let mut messages = params
        .messages
        .iter()
        .filter_map(to_rig_message)
        .collect::<Vec<_>>();

    if messages.is_empty() {
        return Err(OpenStreamError::NoChatMessages);
    }

    let Some(prompt) = messages.pop() else {
        return Err(OpenStreamError::NoChatMessages);
    };

    let mut builder = model.completion_request(prompt).messages(messages);

    if let Some(preamble) = merged_preamble(params.preamble, params.messages) {
        builder = builder.preamble(preamble);
    }

    if let Some(temperature) = params.temperature {
        builder = builder.temperature(temperature);
    }

    if let Some(max_tokens) = params.max_tokens {
        builder = builder.max_tokens(max_tokens);
    }

    builder.stream().await.map_err(OpenStreamError::Completions)
}

enum OpenStreamError {
    NoChatMessages,
    Completions(rig::completion::CompletionError),
}

fn map_stream_item<R>(target: StreamTarget, item: StreamedAssistantContent<R>) -> Option<StreamEventMapped>
where
    R: Clone + Unpin,
{
    let payload = match item {
        StreamedAssistantContent::Text(text) => StreamEventPayload::Delta(text.text),
        StreamedAssistantContent::Reasoning(reasoning) => {
            // Rig can split reasoning into multiple fragments; flatten before forwarding.
            let text = reasoning.reasoning.join("");
            if text.is_empty() {
                return None;
            }
            StreamEventPayload::ReasoningDelta(text)
        }
        StreamedAssistantContent::ReasoningDelta { reasoning, .. } => {
            if reasoning.is_empty() {
                return None;
            }
            StreamEventPayload::ReasoningDelta(reasoning)
        }
        StreamedAssistantContent::ToolCall { .. }
        | StreamedAssistantContent::ToolCallDelta { .. }
        | StreamedAssistantContent::Final(_) => return None,
    };

    Some(StreamEventMapped { target, payload })
}

fn emit_error_event(
    event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
    target: StreamTarget,
    error: ProviderError,
) {
    let _ = event_tx.send(StreamEventMapped {
        target,
        payload: StreamEventPayload::Error(error.to_string()),
    });
}

/// Drives one provider stream to completion, forwarding mapped events until
/// the stream ends, fails, or the cancel signal fires.
pub(crate) async fn run_stream_worker<M>(
    provider_id: String,
    model: M,
    request: StreamRequest,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
    mut cancel_rx: oneshot::Receiver<()>,
) where
    M: CompletionModel,
    M::StreamingResponse: Clone + Unpin,
{
    let target = request.target;
    let open_result = open_stream(
        model,
        OpenStreamParams {
            messages: &request.messages,
            preamble: request.preamble.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        },
    )
    .await;

    let mut stream = match open_result {
        Ok(stream) => stream,
        Err(OpenStreamError::NoChatMessages) => {
            tracing::warn!(
                target = ?target,
                provider_id = %provider_id,
                model_id = %request.model_id,
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            emit_error_event(
                &event_tx,
                target,
                EmptyMessageSetSnafu {
                    stage: "open-stream-filter-messages",
                    target,
                }
                .build(),
            );
            return;
        }
        Err(OpenStreamError::Completions(source)) => {
            let error = ProviderError::CompletionsFailed {
                stage: "open-stream",
                source,
            };
            tracing::error!(
                target = ?target,
                provider_id = %provider_id,
                model_id = %request.model_id,
                error = %error,
                "failed to open provider stream"
            );
            emit_error_event(&event_tx, target, error);
            return;
        }
    };

    let mut cancelled = false;
    let mut stream_failed = false;

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                cancelled = true;
                // Cancel the upstream Rig stream so provider IO stops promptly.
                tracing::debug!(target = ?target, "provider stream cancelled");
                stream.cancel();
                break;
            }
            next_item = stream.next() => {
                match next_item {
                    Some(Ok(item)) => {
                        if let Some(mapped) = map_stream_item(target, item)
                            && event_tx.send(mapped).is_err()
                        {
                            return;
                        }
                    }
                    Some(Err(source)) => {
                        stream_failed = true;
                        tracing::warn!(
                            target = ?target,
                            error = %source,
                            "provider stream emitted an error chunk"
                        );
                        let error = ProviderError::CompletionsFailed {
                            stage: "stream-chunk",
                            source,
                        };
                        emit_error_event(&event_tx, target, error);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if !cancelled && !stream_failed {
        let _ = event_tx.send(StreamEventMapped {
            target,
            payload: StreamEventPayload::Done,
        });
    }
}

/// One-shot completion built on the same stream machinery: drains text deltas
/// into a single string.
pub(crate) async fn collect_completion<M>(
    model: M,
    request: CompletionRequest,
) -> ProviderResult<String>
where
    M: CompletionModel,
    M::StreamingResponse: Clone + Unpin,
{
    let open_result = open_stream(
        model,
        OpenStreamParams {
            messages: &request.messages,
            preamble: request.preamble.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        },
    )
    .await;

    let mut stream = match open_result {
        Ok(stream) => stream,
        Err(OpenStreamError::NoChatMessages) => {
            return EmptyCompletionMessageSetSnafu {
                stage: "collect-completion-filter-messages",
            }
            .fail();
        }
        Err(OpenStreamError::Completions(source)) => {
            return Err(ProviderError::CompletionsFailed {
                stage: "collect-completion-open",
                source,
            });
        }
    };

    let mut collected = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(StreamedAssistantContent::Text(text)) => collected.push_str(&text.text),
            Ok(_) => {}
            Err(source) => {
                return Err(ProviderError::CompletionsFailed {
                    stage: "collect-completion-chunk",
                    source,
                });
            }
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_fold_into_preamble() {
        let messages = vec![
            ProviderMessage::new(Role::System, "You are terse."),
            ProviderMessage::new(Role::User, "hello"),
        ];

        let merged = merged_preamble(Some("Base prompt."), &messages);
        assert_eq!(merged.as_deref(), Some("Base prompt.\n\nYou are terse."));
    }

    #[test]
    fn blank_preamble_parts_are_dropped() {
        let messages = vec![ProviderMessage::new(Role::User, "hello")];
        assert_eq!(merged_preamble(Some("   "), &messages), None);
    }
}
