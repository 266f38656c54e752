use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use crate::bracket_tool_calls::extract_bracket_tool_calls;
use crate::error::GatewayError;
use crate::event_stream::{EventStreamParser, UpstreamEvent};
use crate::reconciler::{self, ToolCall};
use crate::token_counter::{TokenCounter, TokenUsage};

/// Per-request streaming state (§3 "Streaming Session State"), owned
/// exclusively by the coordinator for the lifetime of one request.
pub struct SessionState {
    pub completion_id: String,
    pub created_at: i64,
    pub accumulated_text: String,
    pub native_tool_calls: Vec<(String, String, String)>,
    pub first_chunk_sent: bool,
    pub usage_blob: Option<serde_json::Value>,
    pub context_percent: Option<f64>,
}

impl SessionState {
    pub fn new(completion_id: String, created_at: i64) -> Self {
        Self {
            completion_id,
            created_at,
            accumulated_text: String::new(),
            native_tool_calls: Vec::new(),
            first_chunk_sent: false,
            usage_blob: None,
            context_percent: None,
        }
    }
}

/// Outcome of finishing a stream: accumulated text, reconciled tool calls,
/// and final token usage, ready for the dialect encoder's final chunk.
pub struct StreamOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// Drives an upstream byte stream through the frame parser and produces a
/// finished outcome (§4.7). Dialect-specific chunk emission happens in the
/// caller, which receives each `UpstreamEvent` via `on_event`.
pub async fn drive_stream<S, E, F>(
    mut byte_stream: S,
    first_byte_timeout: Duration,
    prompt_text_tokens: u64,
    max_input_tokens: Option<u64>,
    token_counter: &TokenCounter,
    mut on_event: F,
) -> Result<StreamOutcome, GatewayError>
where
    S: futures_util::Stream<Item = Result<Bytes, E>> + Unpin,
    F: FnMut(&UpstreamEvent),
{
    let mut parser = EventStreamParser::new();
    let mut state = SessionState::new(String::new(), 0);

    let first = tokio::time::timeout(first_byte_timeout, byte_stream.next()).await;
    let first_chunk = match first {
        Err(_elapsed) => return Err(GatewayError::FirstByteTimeout),
        Ok(None) => {
            // Empty response: nothing more to read, finalize with no content.
            return Ok(finalize(&mut state, prompt_text_tokens, max_input_tokens, token_counter));
        }
        Ok(Some(Err(_network_error))) => {
            return Err(GatewayError::Upstream {
                status: axum::http::StatusCode::BAD_GATEWAY,
            });
        }
        Ok(Some(Ok(bytes))) => bytes,
    };

    for event in parser.feed(&first_chunk) {
        route_event(&mut state, &event, &mut on_event);
    }

    while let Some(next) = byte_stream.next().await {
        let bytes = match next {
            Ok(bytes) => bytes,
            Err(_network_error) => break,
        };
        for event in parser.feed(&bytes) {
            route_event(&mut state, &event, &mut on_event);
        }
    }

    Ok(finalize(&mut state, prompt_text_tokens, max_input_tokens, token_counter))
}

fn route_event(state: &mut SessionState, event: &UpstreamEvent, on_event: &mut impl FnMut(&UpstreamEvent)) {
    match event {
        UpstreamEvent::Content(text) => {
            state.accumulated_text.push_str(text);
            state.first_chunk_sent = true;
        }
        UpstreamEvent::ToolCallFragment { id, name, args_json } => {
            state
                .native_tool_calls
                .push((id.clone(), name.clone(), args_json.clone()));
        }
        UpstreamEvent::Usage(blob) => {
            state.usage_blob = Some(blob.clone());
        }
        UpstreamEvent::ContextUsagePercent(percent) => {
            state.context_percent = Some(*percent);
        }
    }
    on_event(event);
}

fn finalize(
    state: &mut SessionState,
    prompt_text_tokens: u64,
    max_input_tokens: Option<u64>,
    token_counter: &TokenCounter,
) -> StreamOutcome {
    let synthetic = extract_bracket_tool_calls(&state.accumulated_text);
    let tool_calls = reconciler::reconcile(&state.native_tool_calls, &synthetic);

    let usage_from_blob = state
        .usage_blob
        .as_ref()
        .and_then(|blob| {
            let prompt = blob.get("promptTokens")?.as_u64()?;
            let completion = blob.get("completionTokens")?.as_u64()?;
            Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            })
        });

    let usage = usage_from_blob.unwrap_or_else(|| {
        token_counter.finalize(
            &state.accumulated_text,
            prompt_text_tokens,
            state.context_percent,
            max_input_tokens,
        )
    });

    StreamOutcome {
        text: std::mem::take(&mut state.accumulated_text),
        tool_calls,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn first_byte_timeout_is_raised_when_upstream_hangs() {
        let counter = TokenCounter::new(false).unwrap();
        let never_stream = stream::pending::<Result<Bytes, std::io::Error>>();
        let result = drive_stream(
            never_stream,
            Duration::from_millis(10),
            0,
            None,
            &counter,
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(GatewayError::FirstByteTimeout)));
    }

    #[tokio::test]
    async fn empty_stream_finalizes_with_no_content() {
        let counter = TokenCounter::new(false).unwrap();
        let empty_stream = stream::iter(Vec::<Result<Bytes, std::io::Error>>::new());
        let outcome = drive_stream(
            empty_stream,
            Duration::from_millis(100),
            0,
            None,
            &counter,
            |_| {},
        )
        .await
        .unwrap();
        assert!(outcome.text.is_empty());
        assert!(outcome.tool_calls.is_empty());
    }
}
