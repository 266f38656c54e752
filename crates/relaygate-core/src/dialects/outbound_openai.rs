use bytes::Bytes;
use relaygate_protocol::openai::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionResponse, ChatCompletionRole,
    CompletionUsage, FinishReason, FunctionCallChunk, ResponseMessage, StreamChoice, StreamDelta,
    ToolCall, ToolCallChunk,
};
use relaygate_protocol::sse::{encode_done, encode_sse};

use crate::reconciler::ToolCall as ReconciledToolCall;
use crate::token_counter::TokenUsage;

/// Maps finish_reason per §4.4.3: `tool_calls` if any tool calls were
/// emitted, otherwise `stop`.
pub fn finish_reason(has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    }
}

pub fn content_delta_chunk(id: &str, created: i64, model: &str, text: &str, is_first: bool) -> Bytes {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![StreamChoice {
            index: 0,
            delta: StreamDelta {
                role: is_first.then_some(ChatCompletionRole::Assistant),
                content: Some(text.to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }],
        usage: None,
    };
    encode_sse(None, &serde_json::to_string(&chunk).unwrap_or_default())
}

pub fn tool_call_chunk(id: &str, created: i64, model: &str, call: &ReconciledToolCall) -> Bytes {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![StreamChoice {
            index: 0,
            delta: StreamDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ToolCallChunk {
                    index: call.index,
                    id: Some(call.id.clone()),
                    kind: Some("function".to_string()),
                    function: Some(FunctionCallChunk {
                        name: Some(call.name.clone()),
                        arguments: Some(call.arguments_json.clone()),
                    }),
                }]),
            },
            finish_reason: None,
        }],
        usage: None,
    };
    encode_sse(None, &serde_json::to_string(&chunk).unwrap_or_default())
}

pub fn final_chunk(id: &str, created: i64, model: &str, reason: FinishReason) -> Bytes {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![StreamChoice {
            index: 0,
            delta: StreamDelta::default(),
            finish_reason: Some(reason),
        }],
        usage: None,
    };
    encode_sse(None, &serde_json::to_string(&chunk).unwrap_or_default())
}

pub fn usage_chunk(id: &str, created: i64, model: &str, usage: TokenUsage) -> Bytes {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: Vec::new(),
        usage: Some(CompletionUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }),
    };
    encode_sse(None, &serde_json::to_string(&chunk).unwrap_or_default())
}

pub fn terminator() -> Bytes {
    encode_done()
}

/// Assembles the non-streaming equivalent (§4.4.3 "Non-streaming responses").
pub fn completion_response(
    id: &str,
    created: i64,
    model: &str,
    text: &str,
    tool_calls: &[ReconciledToolCall],
    usage: TokenUsage,
) -> ChatCompletionResponse {
    let reason = finish_reason(!tool_calls.is_empty());
    let tool_calls = if tool_calls.is_empty() {
        None
    } else {
        Some(
            tool_calls
                .iter()
                .map(|call| ToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: relaygate_protocol::openai::FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments_json.clone(),
                    },
                })
                .collect(),
        )
    };

    ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ResponseMessage {
                role: ChatCompletionRole::Assistant,
                content: if text.is_empty() { None } else { Some(text.to_string()) },
                tool_calls,
            },
            finish_reason: reason,
        }],
        usage: CompletionUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_reflects_tool_calls() {
        assert_eq!(finish_reason(true), FinishReason::ToolCalls);
        assert_eq!(finish_reason(false), FinishReason::Stop);
    }

    #[test]
    fn completion_response_has_stop_reason_without_tool_calls() {
        let response = completion_response(
            "chatcmpl-1",
            0,
            "gpt-4o",
            "Hello",
            &[],
            TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 1,
                total_tokens: 6,
            },
        );
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total_tokens, 6);
    }
}
