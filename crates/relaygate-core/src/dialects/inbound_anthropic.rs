use relaygate_protocol::anthropic::{
    ContentBlock, Message, MessageContent, MessageRole, MessagesRequest, ToolChoice as AnthropicToolChoice,
    ToolResultContent,
};
use relaygate_protocol::model_table::to_upstream_model_id;
use relaygate_protocol::{CanonicalMessage, CanonicalRequest, Part, Role, ToolChoice, ToolDescriptor};

use crate::error::GatewayError;

/// Normalises an Anthropic Messages request into the canonical form
/// (§4.4.1). `system` is already top-level; content blocks map 1:1 to
/// canonical parts, and tool results are already user-authored.
pub fn from_anthropic_request(
    request: MessagesRequest,
    tool_description_max_length: usize,
) -> Result<CanonicalRequest, GatewayError> {
    let mut messages = Vec::with_capacity(request.messages.len());
    for message in request.messages {
        messages.push(to_canonical_message(message)?);
    }

    let mut tools = Vec::new();
    let mut relocated_docs = Vec::new();
    for tool in request.tools.unwrap_or_default() {
        let mut descriptor = ToolDescriptor {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            json_schema: tool.input_schema,
        };
        if let Some(relocated) = descriptor.relocate_oversized_description(tool_description_max_length) {
            relocated_docs.push(relocated);
        }
        tools.push(descriptor);
    }

    let mut system_prompt = request.system;
    if !relocated_docs.is_empty() {
        let appendix = relocated_docs.join("\n\n");
        system_prompt = Some(match system_prompt {
            Some(existing) => format!("{existing}\n\n{appendix}"),
            None => appendix,
        });
    }

    let tool_choice = request.tool_choice.map(|choice| match choice {
        AnthropicToolChoice::Mode { kind } => match kind.as_str() {
            "none" => ToolChoice::None,
            "any" => ToolChoice::Required,
            _ => ToolChoice::Auto,
        },
        AnthropicToolChoice::Named { name, .. } => ToolChoice::Named(name),
    });

    Ok(CanonicalRequest {
        model_id: to_upstream_model_id(&request.model),
        system_prompt,
        messages,
        tools,
        tool_choice,
        max_output_tokens: request.max_tokens,
        stream: request.stream,
        temperature: request.temperature,
        stop_sequences: request.stop_sequences.unwrap_or_default(),
        conversation_id: None,
    })
}

fn to_canonical_message(message: Message) -> Result<CanonicalMessage, GatewayError> {
    let role = match message.role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    };
    let blocks = match message.content {
        MessageContent::Text(text) => vec![ContentBlock::Text { text }],
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::with_capacity(blocks.len());
    for block in blocks {
        parts.push(block_to_part(block)?);
    }
    Ok(CanonicalMessage { role, content: parts })
}

fn block_to_part(block: ContentBlock) -> Result<Part, GatewayError> {
    match block {
        ContentBlock::Text { text } => Ok(Part::Text { text }),
        ContentBlock::Image { source } => {
            if source.kind != "base64" {
                return Err(GatewayError::unsupported_input(
                    "only base64 inline image sources are supported; the upstream requires inline data",
                ));
            }
            Ok(Part::Image {
                media_type: source.media_type,
                data: source.data,
            })
        }
        ContentBlock::ToolUse { id, name, input } => Ok(Part::ToolUse {
            id,
            name,
            arguments_json: input.to_string(),
        }),
        ContentBlock::ToolResult { tool_use_id, content } => {
            let content = match content {
                ToolResultContent::Text(text) => text,
                ToolResultContent::Blocks(blocks) => blocks
                    .into_iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            };
            Ok(Part::ToolResult { tool_use_id, content })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_system_is_preserved() {
        let request = MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            system: Some("Be terse.".to_string()),
            messages: vec![Message {
                role: MessageRole::User,
                content: MessageContent::Text("Hi".to_string()),
            }],
            max_tokens: 100,
            stream: false,
            temperature: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
        };

        let canonical = from_anthropic_request(request, 10_000).unwrap();
        assert_eq!(canonical.system_prompt.as_deref(), Some("Be terse."));
    }

    #[test]
    fn external_image_source_is_rejected() {
        let request = MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            system: None,
            messages: vec![Message {
                role: MessageRole::User,
                content: MessageContent::Blocks(vec![ContentBlock::Image {
                    source: relaygate_protocol::anthropic::ImageSource {
                        kind: "url".to_string(),
                        media_type: "image/png".to_string(),
                        data: "https://example.com/cat.png".to_string(),
                    },
                }]),
            }],
            max_tokens: 100,
            stream: false,
            temperature: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
        };

        let result = from_anthropic_request(request, 10_000);
        assert!(matches!(result, Err(GatewayError::UnsupportedInput(_))));
    }
}
