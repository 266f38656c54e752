use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dialect-neutral chat request. Produced by inbound translation (§4.4.1),
/// consumed by the upstream envelope encoder (§4.4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: Option<ToolChoice>,
    pub max_output_tokens: u32,
    pub stream: bool,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: Vec<Part>,
}

/// A single typed content part. Kept as an explicit tagged enum rather than a
/// trait-object hierarchy so translators can match exhaustively (§9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded bytes. External URLs are rejected during inbound
        /// translation (`UnsupportedInputError`) before a `Part` is ever built.
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments_json: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub json_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Applies the §4.4.1 relocation rule in place, returning the text that
    /// must be appended to the system prompt, if any.
    pub fn relocate_oversized_description(&mut self, max_length: usize) -> Option<String> {
        if self.description.len() <= max_length {
            return None;
        }
        let header = format!("## Tool Documentation: {}", self.name);
        let relocated = format!("{header}\n{}", self.description);
        self.description = format!(
            "See system prompt under 'Tool Documentation: {}'",
            self.name
        );
        Some(relocated)
    }
}

pub type JsonObject = BTreeMap<String, serde_json::Value>;

/// Recursively sorts object keys and renders canonical whitespace-free JSON,
/// used as the reconciler's deduplication key (§4.3).
pub fn canonicalize_json(value: &serde_json::Value) -> String {
    serde_json::to_string(&sort_keys(value)).unwrap_or_default()
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocation_leaves_short_descriptions_untouched() {
        let mut tool = ToolDescriptor {
            name: "get_weather".to_string(),
            description: "short".to_string(),
            json_schema: serde_json::json!({}),
        };
        assert!(tool.relocate_oversized_description(10_000).is_none());
        assert_eq!(tool.description, "short");
    }

    #[test]
    fn relocation_replaces_long_descriptions_with_a_stub() {
        let mut tool = ToolDescriptor {
            name: "get_weather".to_string(),
            description: "x".repeat(20_000),
            json_schema: serde_json::json!({}),
        };
        let relocated = tool.relocate_oversized_description(10_000).unwrap();
        assert!(relocated.starts_with("## Tool Documentation: get_weather"));
        assert!(relocated.ends_with(&"x".repeat(20_000)));
        assert_eq!(
            tool.description,
            "See system prompt under 'Tool Documentation: get_weather'"
        );
    }

    #[test]
    fn canonicalize_json_sorts_object_keys() {
        let a = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = serde_json::json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonicalize_json(&a), canonicalize_json(&b));
    }
}
