use bytes::Bytes;
use relaygate_protocol::anthropic::{
    ContentBlock, ContentDelta, MessageDeltaPayload, MessageRole, MessageStartPayload,
    MessagesResponse, StopReason, StreamEvent, Usage,
};
use relaygate_protocol::sse::encode_sse;

use crate::reconciler::ToolCall as ReconciledToolCall;
use crate::token_counter::TokenUsage;

/// Maps stop_reason per §4.4.3: `tool_use` if any tool calls were emitted,
/// otherwise `end_turn`.
pub fn stop_reason(has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    }
}

fn event_name(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
    }
}

pub fn encode_event(event: &StreamEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_default();
    encode_sse(Some(event_name(event)), &data)
}

pub fn message_start(id: &str, model: &str) -> StreamEvent {
    StreamEvent::MessageStart {
        message: MessageStartPayload {
            id: id.to_string(),
            kind: "message".to_string(),
            role: MessageRole::Assistant,
            content: Vec::new(),
            model: model.to_string(),
            usage: Usage { input_tokens: 0, output_tokens: 0 },
        },
    }
}

pub fn content_block_start_text(index: u32) -> StreamEvent {
    StreamEvent::ContentBlockStart {
        index,
        content_block: ContentBlock::Text { text: String::new() },
    }
}

pub fn content_block_delta_text(index: u32, text: &str) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: ContentDelta::TextDelta { text: text.to_string() },
    }
}

pub fn content_block_start_tool_use(index: u32, call: &ReconciledToolCall) -> StreamEvent {
    StreamEvent::ContentBlockStart {
        index,
        content_block: ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::json!({}),
        },
    }
}

pub fn content_block_delta_input_json(index: u32, partial_json: &str) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: ContentDelta::InputJsonDelta { partial_json: partial_json.to_string() },
    }
}

pub fn content_block_stop(index: u32) -> StreamEvent {
    StreamEvent::ContentBlockStop { index }
}

pub fn message_delta(reason: StopReason, usage: TokenUsage) -> StreamEvent {
    StreamEvent::MessageDelta {
        delta: MessageDeltaPayload { stop_reason: reason },
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

pub fn message_stop() -> StreamEvent {
    StreamEvent::MessageStop
}

/// Assembles the non-streaming equivalent (§4.4.3 "Non-streaming responses").
pub fn messages_response(
    id: &str,
    model: &str,
    text: &str,
    tool_calls: &[ReconciledToolCall],
    usage: TokenUsage,
) -> MessagesResponse {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::Text { text: text.to_string() });
    }
    for call in tool_calls {
        content.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::from_str(&call.arguments_json).unwrap_or(serde_json::json!({})),
        });
    }

    MessagesResponse {
        id: id.to_string(),
        kind: "message".to_string(),
        role: MessageRole::Assistant,
        content,
        model: model.to_string(),
        stop_reason: stop_reason(!tool_calls.is_empty()),
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_reflects_tool_calls() {
        assert_eq!(stop_reason(true), StopReason::ToolUse);
        assert_eq!(stop_reason(false), StopReason::EndTurn);
    }

    #[test]
    fn event_names_match_anthropic_sse_framing() {
        let frame = encode_event(&message_stop());
        assert_eq!(frame.as_ref(), b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    }

    #[test]
    fn messages_response_includes_tool_use_block() {
        let call = ReconciledToolCall {
            index: 0,
            id: "t1".to_string(),
            name: "get_weather".to_string(),
            arguments_json: r#"{"city":"Tokyo"}"#.to_string(),
        };
        let response = messages_response(
            "msg_1",
            "claude-sonnet-4",
            "Let me check.",
            &[call],
            TokenUsage { prompt_tokens: 10, completion_tokens: 3, total_tokens: 13 },
        );
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.content.len(), 2);
    }
}
