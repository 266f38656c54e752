use relaygate_protocol::model_table::to_upstream_model_id;
use relaygate_protocol::openai::{
    ChatCompletionRequest, ChatCompletionRequestMessage, ChatCompletionRole, ContentPart,
    MessageContent, StopSequences, ToolChoiceOption, ToolDefinition as OpenAiToolDefinition,
};
use relaygate_protocol::{CanonicalMessage, CanonicalRequest, Part, Role, ToolChoice, ToolDescriptor};

use crate::error::GatewayError;

/// Normalises an OpenAI Chat Completions request into the canonical form
/// (§4.4.1). `system` messages are concatenated into `system_prompt`; `tool`
/// messages become `tool_result` parts on a new `user` message.
pub fn from_openai_request(
    request: ChatCompletionRequest,
    tool_description_max_length: usize,
) -> Result<CanonicalRequest, GatewayError> {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in request.messages {
        match message.role {
            ChatCompletionRole::System => {
                if let Some(text) = content_as_text(message.content.as_ref()) {
                    system_parts.push(text);
                }
            }
            ChatCompletionRole::Tool => {
                let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                let content = content_as_text(message.content.as_ref()).unwrap_or_default();
                messages.push(CanonicalMessage {
                    role: Role::User,
                    content: vec![Part::ToolResult {
                        tool_use_id,
                        content,
                    }],
                });
            }
            ChatCompletionRole::User | ChatCompletionRole::Assistant => {
                let role = if message.role == ChatCompletionRole::User {
                    Role::User
                } else {
                    Role::Assistant
                };
                let mut parts = content_to_parts(message.content.as_ref())?;
                if let Some(tool_calls) = message.tool_calls {
                    for call in tool_calls {
                        parts.push(Part::ToolUse {
                            id: call.id,
                            name: call.function.name,
                            arguments_json: call.function.arguments,
                        });
                    }
                }
                messages.push(CanonicalMessage { role, content: parts });
            }
        }
    }

    let mut tools = Vec::new();
    let mut relocated_docs = Vec::new();
    for tool in request.tools.unwrap_or_default() {
        let OpenAiToolDefinition::Function { function } = tool;
        let mut descriptor = ToolDescriptor {
            name: function.name,
            description: function.description.unwrap_or_default(),
            json_schema: function.parameters.unwrap_or(serde_json::json!({})),
        };
        if let Some(relocated) = descriptor.relocate_oversized_description(tool_description_max_length) {
            relocated_docs.push(relocated);
        }
        tools.push(descriptor);
    }

    let mut system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    if !relocated_docs.is_empty() {
        let appendix = relocated_docs.join("\n\n");
        system_prompt = Some(match system_prompt {
            Some(existing) => format!("{existing}\n\n{appendix}"),
            None => appendix,
        });
    }

    let tool_choice = request.tool_choice.map(|choice| match choice {
        ToolChoiceOption::Mode(mode) => match mode.as_str() {
            "none" => ToolChoice::None,
            "required" => ToolChoice::Required,
            _ => ToolChoice::Auto,
        },
        ToolChoiceOption::Named { function, .. } => ToolChoice::Named(function.name),
    });

    let stop_sequences = match request.stop {
        Some(StopSequences::One(s)) => vec![s],
        Some(StopSequences::Many(many)) => many,
        None => Vec::new(),
    };

    Ok(CanonicalRequest {
        model_id: to_upstream_model_id(&request.model),
        system_prompt,
        messages,
        tools,
        tool_choice,
        max_output_tokens: request
            .max_completion_tokens
            .or(request.max_tokens)
            .unwrap_or(4096),
        stream: request.stream,
        temperature: request.temperature,
        stop_sequences,
        conversation_id: None,
    })
}

fn content_as_text(content: Option<&MessageContent>) -> Option<String> {
    match content {
        Some(MessageContent::Text(text)) => Some(text.clone()),
        Some(MessageContent::Parts(parts)) => {
            let joined: String = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("");
            if joined.is_empty() { None } else { Some(joined) }
        }
        None => None,
    }
}

fn content_to_parts(content: Option<&MessageContent>) -> Result<Vec<Part>, GatewayError> {
    match content {
        None => Ok(Vec::new()),
        Some(MessageContent::Text(text)) => Ok(vec![Part::Text { text: text.clone() }]),
        Some(MessageContent::Parts(parts)) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    ContentPart::Text { text } => out.push(Part::Text { text: text.clone() }),
                    ContentPart::ImageUrl { image_url } => {
                        out.push(decode_image_part(&image_url.url)?)
                    }
                }
            }
            Ok(out)
        }
    }
}

fn decode_image_part(url: &str) -> Result<Part, GatewayError> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (media_type, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| GatewayError::unsupported_input("malformed data: image URI"))?;
        return Ok(Part::Image {
            media_type: media_type.to_string(),
            data: data.to_string(),
        });
    }
    Err(GatewayError::unsupported_input(
        "external image URLs are not supported; the upstream requires inline data",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_protocol::openai::ChatCompletionRole;

    fn user_message(text: &str) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage {
            role: ChatCompletionRole::User,
            content: Some(MessageContent::Text(text.to_string())),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    #[test]
    fn system_messages_are_concatenated_into_system_prompt() {
        let request = ChatCompletionRequest {
            model: "claude-sonnet-4".to_string(),
            messages: vec![
                ChatCompletionRequestMessage {
                    role: ChatCompletionRole::System,
                    content: Some(MessageContent::Text("Be terse.".to_string())),
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                },
                user_message("Hi"),
            ],
            stream: false,
            tools: None,
            tool_choice: None,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            stop: None,
        };

        let canonical = from_openai_request(request, 10_000).unwrap();
        assert_eq!(canonical.system_prompt.as_deref(), Some("Be terse."));
        assert_eq!(canonical.messages.len(), 1);
    }

    #[test]
    fn external_image_url_is_rejected() {
        let request = ChatCompletionRequest {
            model: "claude-sonnet-4".to_string(),
            messages: vec![ChatCompletionRequestMessage {
                role: ChatCompletionRole::User,
                content: Some(MessageContent::Parts(vec![ContentPart::ImageUrl {
                    image_url: relaygate_protocol::openai::ImageUrl {
                        url: "https://example.com/cat.png".to_string(),
                    },
                }])),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            }],
            stream: false,
            tools: None,
            tool_choice: None,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            stop: None,
        };

        let result = from_openai_request(request, 10_000);
        assert!(matches!(result, Err(GatewayError::UnsupportedInput(_))));
    }

    #[test]
    fn oversized_tool_description_is_relocated_to_system_prompt() {
        let request = ChatCompletionRequest {
            model: "claude-sonnet-4".to_string(),
            messages: vec![user_message("Hi")],
            stream: false,
            tools: Some(vec![OpenAiToolDefinition::Function {
                function: relaygate_protocol::openai::FunctionObject {
                    name: "get_weather".to_string(),
                    description: Some("x".repeat(20_000)),
                    parameters: Some(serde_json::json!({})),
                },
            }]),
            tool_choice: None,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            stop: None,
        };

        let canonical = from_openai_request(request, 10_000).unwrap();
        assert!(
            canonical
                .system_prompt
                .as_deref()
                .unwrap()
                .contains("## Tool Documentation: get_weather")
        );
        assert_eq!(
            canonical.tools[0].description,
            "See system prompt under 'Tool Documentation: get_weather'"
        );
    }
}
