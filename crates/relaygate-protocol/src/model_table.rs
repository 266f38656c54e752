/// Maps a dialect-facing model name to the upstream model id. Unknown names
/// pass through unchanged (§4.4.1).
pub fn to_upstream_model_id(model_name: &str) -> String {
    static TABLE: &[(&str, &str)] = &[
        ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
        ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
        ("claude-opus-4", "CLAUDE_OPUS_4_20250514_V1_0"),
        ("claude-3-7-sonnet", "CLAUDE_3_7_SONNET_20250219_V1_0"),
        ("claude-3-5-haiku", "CLAUDE_3_5_HAIKU_20241022_V1_0"),
        ("gpt-4o", "CLAUDE_SONNET_4_20250514_V1_0"),
    ];
    TABLE
        .iter()
        .find(|(name, _)| *name == model_name)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| model_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_is_mapped() {
        assert_eq!(
            to_upstream_model_id("claude-sonnet-4"),
            "CLAUDE_SONNET_4_20250514_V1_0"
        );
    }

    #[test]
    fn unknown_model_passes_through() {
        assert_eq!(to_upstream_model_id("some-future-model"), "some-future-model");
    }
}
