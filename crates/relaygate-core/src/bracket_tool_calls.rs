/// Extracts plain-text tool-call markup of the form `[tool_name({json_args})]`
/// from accumulated stream text. Runs once over the fully accumulated text at
/// end-of-stream (§4.2), not incrementally.
///
/// Uses a balanced-brace scanner rather than a fixed-depth regex: starting
/// at `(`, depth counts `{`/`}` while ignoring braces inside JSON string
/// literals (tracked with an in-string/escape flag) until depth returns to
/// zero, then requires the immediately following characters to be `)]`.
/// This supports arbitrarily nested JSON arguments. Matches are attempted
/// non-overlapping, left to right.
pub fn extract_bracket_tool_calls(text: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut matches = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '[' {
            i += 1;
            continue;
        }
        if let Some((name, args_json, end)) = try_match_at(&chars, i) {
            matches.push((name, args_json));
            i = end;
        } else {
            i += 1;
        }
    }

    matches
}

fn try_match_at(chars: &[char], open_bracket: usize) -> Option<(String, String, usize)> {
    let mut i = open_bracket + 1;
    let name_start = i;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if i == name_start || i >= chars.len() || chars[i] != '(' {
        return None;
    }
    let name: String = chars[name_start..i].iter().collect();

    let json_start = i + 1;
    if json_start >= chars.len() || chars[json_start] != '{' {
        return None;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut j = json_start;
    loop {
        if j >= chars.len() {
            return None;
        }
        let c = chars[j];
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        j += 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        j += 1;
    }

    let json_end = j;
    if json_end + 1 >= chars.len() || chars[json_end] != ')' || chars[json_end + 1] != ']' {
        return None;
    }

    let args_json: String = chars[json_start..json_end].iter().collect();
    Some((name, args_json, json_end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_simple_call() {
        let matches = extract_bracket_tool_calls(r#"Sure, [get_weather({"city":"Paris"})] one sec"#);
        assert_eq!(matches, vec![("get_weather".to_string(), r#"{"city":"Paris"}"#.to_string())]);
    }

    #[test]
    fn handles_nested_objects_and_arrays() {
        let text = r#"[search({"filters":{"tags":["a","b"]},"limit":5})]"#;
        let matches = extract_bracket_tool_calls(text);
        assert_eq!(
            matches,
            vec![(
                "search".to_string(),
                r#"{"filters":{"tags":["a","b"]},"limit":5}"#.to_string()
            )]
        );
    }

    #[test]
    fn ignores_braces_inside_string_literals() {
        let text = r#"[echo({"message":"a } weird } string"})]"#;
        let matches = extract_bracket_tool_calls(text);
        assert_eq!(
            matches,
            vec![("echo".to_string(), r#"{"message":"a } weird } string"}"#.to_string())]
        );
    }

    #[test]
    fn finds_multiple_non_overlapping_matches() {
        let text = r#"[a({"x":1})] then [b({"y":2})]"#;
        let matches = extract_bracket_tool_calls(text);
        assert_eq!(
            matches,
            vec![
                ("a".to_string(), r#"{"x":1}"#.to_string()),
                ("b".to_string(), r#"{"y":2}"#.to_string()),
            ]
        );
    }

    #[test]
    fn ignores_unterminated_brackets() {
        let matches = extract_bracket_tool_calls(r#"[get_weather({"city": "Paris"}"#);
        assert!(matches.is_empty());
    }
}
