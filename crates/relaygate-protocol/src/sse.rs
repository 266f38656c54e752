use bytes::Bytes;

/// Encodes one Server-Sent-Event frame. `event` is omitted for OpenAI's
/// data-only framing; Anthropic dialect always supplies one (§6).
pub fn encode_sse(event: Option<&str>, data: &str) -> Bytes {
    let mut out = String::new();
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_only_framing_omits_event_line() {
        let frame = encode_sse(None, "{\"a\":1}");
        assert_eq!(frame.as_ref(), b"data: {\"a\":1}\n\n");
    }

    #[test]
    fn named_event_framing_includes_event_line() {
        let frame = encode_sse(Some("message_start"), "{}");
        assert_eq!(frame.as_ref(), b"event: message_start\ndata: {}\n\n");
    }
}
