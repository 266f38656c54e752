use relaygate_protocol::upstream::{
    AssistantResponseMessage, ConversationState, CurrentMessage, GenerateAssistantResponseRequest,
    HistoryEntry, ToolSpecification, UpstreamTool, UserInputMessage, UserInputMessageContext,
};
use relaygate_protocol::{CanonicalRequest, Part, Role};

/// Re-encodes a canonical request into the UPSTREAM `GenerateAssistantResponse`
/// envelope (§4.4.2). The last canonical user message forms the current
/// input; all earlier messages form `history[]`.
pub fn build_upstream_request(
    request: &CanonicalRequest,
    profile_arn: Option<&str>,
) -> GenerateAssistantResponseRequest {
    let tools: Vec<UpstreamTool> = request
        .tools
        .iter()
        .map(|tool| UpstreamTool {
            tool_specification: ToolSpecification {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.json_schema.clone(),
            },
        })
        .collect();
    let tool_context = if tools.is_empty() {
        None
    } else {
        Some(UserInputMessageContext { tools })
    };

    // The last canonical *user* message forms the current input; everything
    // before it forms history. A conversation with no user message at all
    // (e.g. only a system/assistant prefill) has no current input to send —
    // that's sent explicitly as empty rather than letting a trailing
    // non-user message masquerade as the current turn.
    let last_user_index = request.messages.iter().rposition(|m| m.role == Role::User);
    let history_slice = match last_user_index {
        Some(idx) => &request.messages[..idx],
        None => &request.messages[..],
    };

    let mut history = Vec::new();
    let mut pending_user: Option<UserInputMessage> = None;
    for message in history_slice {
        match message.role {
            Role::User | Role::Tool | Role::System => {
                if let Some(previous) = pending_user.take() {
                    // A user turn with no matching assistant reply; UPSTREAM
                    // history entries must pair, so synthesize an empty one.
                    history.push(HistoryEntry {
                        user_input_message: previous,
                        assistant_response_message: AssistantResponseMessage { content: String::new() },
                    });
                }
                pending_user = Some(UserInputMessage {
                    content: flatten_text(&message.content),
                    model_id: request.model_id.clone(),
                    user_input_message_context: tool_context.clone(),
                });
            }
            Role::Assistant => {
                let content = flatten_text(&message.content);
                if let Some(user) = pending_user.take() {
                    history.push(HistoryEntry {
                        user_input_message: user,
                        assistant_response_message: AssistantResponseMessage { content },
                    });
                }
            }
        }
    }

    let current_text = last_user_index
        .and_then(|idx| request.messages.get(idx))
        .map(|m| flatten_text(&m.content))
        .unwrap_or_default();

    let current_message = CurrentMessage {
        user_input_message: UserInputMessage {
            content: current_text,
            model_id: request.model_id.clone(),
            user_input_message_context: tool_context,
        },
    };

    let conversation_id = request
        .conversation_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    GenerateAssistantResponseRequest {
        conversation_state: ConversationState {
            conversation_id,
            chat_trigger_type: "MANUAL".to_string(),
            current_message,
            history,
        },
        profile_arn: profile_arn.map(str::to_string),
    }
}

fn flatten_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(text.clone()),
            Part::ToolResult { content, .. } => Some(content.clone()),
            Part::ToolUse { .. } | Part::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_protocol::CanonicalMessage;

    fn request_with(messages: Vec<CanonicalMessage>) -> CanonicalRequest {
        CanonicalRequest {
            model_id: "CLAUDE_SONNET_4_20250514_V1_0".to_string(),
            system_prompt: None,
            messages,
            tools: Vec::new(),
            tool_choice: None,
            max_output_tokens: 1024,
            stream: true,
            temperature: None,
            stop_sequences: Vec::new(),
            conversation_id: None,
        }
    }

    #[test]
    fn last_user_message_becomes_current_input() {
        let request = request_with(vec![CanonicalMessage {
            role: Role::User,
            content: vec![Part::Text { text: "Hi".to_string() }],
        }]);
        let envelope = build_upstream_request(&request, None);
        assert_eq!(
            envelope.conversation_state.current_message.user_input_message.content,
            "Hi"
        );
        assert!(envelope.conversation_state.history.is_empty());
    }

    #[test]
    fn earlier_turns_pair_into_history() {
        let request = request_with(vec![
            CanonicalMessage {
                role: Role::User,
                content: vec![Part::Text { text: "first".to_string() }],
            },
            CanonicalMessage {
                role: Role::Assistant,
                content: vec![Part::Text { text: "reply".to_string() }],
            },
            CanonicalMessage {
                role: Role::User,
                content: vec![Part::Text { text: "second".to_string() }],
            },
        ]);
        let envelope = build_upstream_request(&request, None);
        assert_eq!(envelope.conversation_state.history.len(), 1);
        assert_eq!(
            envelope.conversation_state.history[0].user_input_message.content,
            "first"
        );
        assert_eq!(
            envelope.conversation_state.history[0].assistant_response_message.content,
            "reply"
        );
        assert_eq!(
            envelope.conversation_state.current_message.user_input_message.content,
            "second"
        );
    }

    #[test]
    fn trailing_assistant_message_does_not_eat_the_last_user_turn() {
        let request = request_with(vec![
            CanonicalMessage {
                role: Role::User,
                content: vec![Part::Text { text: "what's the weather".to_string() }],
            },
            CanonicalMessage {
                role: Role::Assistant,
                content: vec![Part::Text { text: "Sure, let me check".to_string() }],
            },
        ]);
        let envelope = build_upstream_request(&request, None);
        assert_eq!(
            envelope.conversation_state.current_message.user_input_message.content,
            "what's the weather"
        );
    }

    #[test]
    fn no_user_message_produces_an_explicit_empty_current_input() {
        let request = request_with(vec![CanonicalMessage {
            role: Role::Assistant,
            content: vec![Part::Text { text: "prefill".to_string() }],
        }]);
        let envelope = build_upstream_request(&request, None);
        assert_eq!(envelope.conversation_state.current_message.user_input_message.content, "");
    }

    #[test]
    fn profile_arn_is_attached_when_set() {
        let request = request_with(vec![CanonicalMessage {
            role: Role::User,
            content: vec![Part::Text { text: "Hi".to_string() }],
        }]);
        let envelope = build_upstream_request(&request, Some("arn:aws:profile"));
        assert_eq!(envelope.profile_arn.as_deref(), Some("arn:aws:profile"));
    }
}
