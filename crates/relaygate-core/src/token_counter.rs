use relaygate_protocol::{CanonicalMessage, Part, ToolDescriptor};
use tiktoken_rs::CoreBPE;

/// Character-to-token ratio observed between the plain character/4 heuristic
/// and Anthropic's own tokenizer on English prose. Applied only when
/// `claude_correction` is enabled (§4.8, Open Question 2).
const CLAUDE_CORRECTION_FACTOR: f64 = 0.95;

pub struct TokenCounter {
    bpe: CoreBPE,
    claude_correction: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenCounter {
    pub fn new(claude_correction: bool) -> anyhow::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self { bpe, claude_correction })
    }

    pub fn count_text(&self, text: &str) -> u64 {
        let raw = self.bpe.encode_ordinary(text).len() as f64;
        let adjusted = if self.claude_correction {
            raw * CLAUDE_CORRECTION_FACTOR
        } else {
            raw
        };
        adjusted.round() as u64
    }

    pub fn count_messages(&self, messages: &[CanonicalMessage], system_prompt: Option<&str>) -> u64 {
        let mut total = system_prompt.map(|s| self.count_text(s)).unwrap_or(0);
        for message in messages {
            for part in &message.content {
                total += match part {
                    Part::Text { text } => self.count_text(text),
                    Part::ToolUse { arguments_json, .. } => self.count_text(arguments_json),
                    Part::ToolResult { content, .. } => self.count_text(content),
                    Part::Image { .. } => 0,
                };
            }
        }
        total
    }

    pub fn count_tool_schemas(&self, tools: &[ToolDescriptor]) -> u64 {
        tools
            .iter()
            .map(|tool| self.count_text(&tool.description) + self.count_text(&tool.json_schema.to_string()))
            .sum()
    }

    /// Computes final usage per §4.8. `context_usage_percent` and
    /// `max_input_tokens` come from the upstream stream when known; when both
    /// are present, the API-derived percentage wins over local estimation.
    pub fn finalize(
        &self,
        accumulated_text: &str,
        prompt_text_tokens: u64,
        context_usage_percent: Option<f64>,
        max_input_tokens: Option<u64>,
    ) -> TokenUsage {
        let completion_tokens = self.count_text(accumulated_text);

        if let (Some(percent), Some(max_input)) = (context_usage_percent, max_input_tokens) {
            if percent > 0.0 {
                let total_tokens = ((percent / 100.0) * max_input as f64).round() as u64;
                let prompt_tokens = total_tokens.saturating_sub(completion_tokens);
                return TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                };
            }
        }

        TokenUsage {
            prompt_tokens: prompt_text_tokens,
            completion_tokens,
            total_tokens: prompt_text_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_context_percentage_when_available() {
        let counter = TokenCounter::new(false).unwrap();
        let usage = counter.finalize("hello", 0, Some(50.0), Some(1000));
        assert_eq!(usage.total_tokens, 500);
        assert_eq!(usage.completion_tokens, counter.count_text("hello"));
        assert_eq!(usage.prompt_tokens, 500 - usage.completion_tokens);
    }

    #[test]
    fn falls_back_to_local_estimate_without_context_percentage() {
        let counter = TokenCounter::new(false).unwrap();
        let usage = counter.finalize("hello world", 12, None, None);
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.total_tokens, 12 + usage.completion_tokens);
    }

    #[test]
    fn claude_correction_only_affects_local_estimate() {
        let plain = TokenCounter::new(false).unwrap();
        let corrected = TokenCounter::new(true).unwrap();
        let text = "The quick brown fox jumps over the lazy dog.";
        assert!(corrected.count_text(text) <= plain.count_text(text));
    }
}
