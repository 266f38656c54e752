use std::collections::HashMap;

use bytes::{Buf, BytesMut};

/// A semantic event produced by the parser (§3 "Upstream Event").
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Content(String),
    ToolCallFragment {
        id: String,
        name: String,
        args_json: String,
    },
    Usage(serde_json::Value),
    ContextUsagePercent(f64),
}

#[derive(Debug, Default)]
struct ToolAccum {
    name: Option<String>,
    args_buffer: String,
}

/// Stateful, incremental parser over the UPSTREAM binary frame protocol
/// (§4.2). Pure byte-buffer state machine: it has no knowledge of the HTTP
/// transport feeding it chunks, so it can be fed arbitrarily split input
/// (including single bytes) and fuzzed directly.
#[derive(Default)]
pub struct EventStreamParser {
    buffer: BytesMut,
    pending_tools: HashMap<String, ToolAccum>,
}

const PRELUDE_LEN: usize = 8;
const PRELUDE_AND_CRC_LEN: usize = 12;
const TRAILER_CRC_LEN: usize = 4;

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the internal buffer and parses as many complete
    /// frames as are now available. Never blocks; a trailing partial frame
    /// is retained for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<UpstreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            if self.buffer.len() < PRELUDE_AND_CRC_LEN {
                break;
            }
            let total_length = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
            if total_length < PRELUDE_AND_CRC_LEN + TRAILER_CRC_LEN || self.buffer.len() < total_length
            {
                if self.buffer.len() < total_length {
                    break;
                }
                // Malformed length; discard just this frame's declared span (or
                // the whole buffer if that span doesn't even make sense) and
                // resynchronise on the next feed.
                tracing::warn!(total_length, "discarding frame with invalid total_length");
                let drop_len = total_length.max(PRELUDE_AND_CRC_LEN).min(self.buffer.len());
                self.buffer.advance(drop_len);
                continue;
            }

            let frame = self.buffer.split_to(total_length);
            if let Some(event) = self.parse_frame(&frame) {
                events.push(event);
            }
        }

        events
    }

    fn parse_frame(&mut self, frame: &[u8]) -> Option<UpstreamEvent> {
        let prelude_crc = u32::from_be_bytes(frame[8..12].try_into().unwrap());
        if crc32fast::hash(&frame[0..PRELUDE_LEN]) != prelude_crc {
            tracing::warn!("prelude CRC mismatch, discarding frame");
            return None;
        }

        let message_crc_offset = frame.len() - TRAILER_CRC_LEN;
        let message_crc = u32::from_be_bytes(
            frame[message_crc_offset..message_crc_offset + 4]
                .try_into()
                .unwrap(),
        );
        if crc32fast::hash(&frame[0..message_crc_offset]) != message_crc {
            tracing::warn!("message CRC mismatch, discarding frame");
            return None;
        }

        let headers_length = u32::from_be_bytes(frame[4..8].try_into().unwrap()) as usize;
        let headers_start = PRELUDE_AND_CRC_LEN;
        let headers_end = headers_start + headers_length;
        if headers_end > message_crc_offset {
            tracing::warn!("headers_length overruns frame, discarding");
            return None;
        }
        let headers = parse_headers(&frame[headers_start..headers_end]);
        let payload = &frame[headers_end..message_crc_offset];

        let event_type = headers.get(":event-type").map(String::as_str).unwrap_or("");
        self.dispatch(event_type, payload)
    }

    fn dispatch(&mut self, event_type: &str, payload: &[u8]) -> Option<UpstreamEvent> {
        match event_type {
            "assistantResponseEvent" | "textDelta" => {
                let text = String::from_utf8_lossy(payload).into_owned();
                let content = serde_json::from_slice::<serde_json::Value>(payload)
                    .ok()
                    .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(str::to_string))
                    .unwrap_or(text);
                Some(UpstreamEvent::Content(content))
            }
            "toolUseEvent" => self.dispatch_tool_use(payload),
            "usageEvent" | "meteringEvent" => {
                serde_json::from_slice(payload).ok().map(UpstreamEvent::Usage)
            }
            "contextUsageEvent" => serde_json::from_slice::<serde_json::Value>(payload)
                .ok()
                .and_then(|v| v.get("percentage").and_then(|p| p.as_f64()))
                .map(UpstreamEvent::ContextUsagePercent),
            _ => None,
        }
    }

    fn dispatch_tool_use(&mut self, payload: &[u8]) -> Option<UpstreamEvent> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let id = value.get("toolUseId")?.as_str()?.to_string();
        let name = value.get("name").and_then(|n| n.as_str()).map(str::to_string);
        let input_chunk = value.get("input").and_then(|i| i.as_str()).unwrap_or("");
        let stop = value.get("stop").and_then(|s| s.as_bool()).unwrap_or(false);

        // A single consolidated frame carries a complete object input instead
        // of a string chunk; treat it as an immediate stop.
        if let Some(input_obj) = value.get("input").filter(|i| i.is_object()) {
            let args_json = input_obj.to_string();
            return Some(UpstreamEvent::ToolCallFragment {
                id,
                name: name.unwrap_or_default(),
                args_json,
            });
        }

        let accum = self.pending_tools.entry(id.clone()).or_default();
        if let Some(name) = name {
            accum.name = Some(name);
        }
        accum.args_buffer.push_str(input_chunk);

        if !stop {
            return None;
        }

        let accum = self.pending_tools.remove(&id)?;
        let args_json = if serde_json::from_str::<serde_json::Value>(&accum.args_buffer).is_ok() {
            accum.args_buffer
        } else {
            serde_json::Value::String(accum.args_buffer).to_string()
        };
        Some(UpstreamEvent::ToolCallFragment {
            id,
            name: accum.name.unwrap_or_default(),
            args_json,
        })
    }
}

fn parse_headers(mut bytes: &[u8]) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    while !bytes.is_empty() {
        if bytes.len() < 2 {
            break;
        }
        let name_len = bytes[0] as usize;
        if bytes.len() < 1 + name_len + 1 {
            break;
        }
        let name = String::from_utf8_lossy(&bytes[1..1 + name_len]).into_owned();
        let value_type = bytes[1 + name_len];
        let value_start = 1 + name_len + 1;

        let (value, consumed) = match value_type {
            0 | 1 => (String::new(), 0), // bool true/false, no payload
            2 => (String::new(), 1),     // byte
            3 => (String::new(), 2),     // short
            4 => (String::new(), 4),     // int
            5 => (String::new(), 8),     // long
            6 => {
                // byte-array: u16 length prefix
                if bytes.len() < value_start + 2 {
                    break;
                }
                let len = u16::from_be_bytes(bytes[value_start..value_start + 2].try_into().unwrap())
                    as usize;
                (String::new(), 2 + len)
            }
            7 => {
                // string: u16 length prefix, utf8 bytes
                if bytes.len() < value_start + 2 {
                    break;
                }
                let len = u16::from_be_bytes(bytes[value_start..value_start + 2].try_into().unwrap())
                    as usize;
                if bytes.len() < value_start + 2 + len {
                    break;
                }
                let value = String::from_utf8_lossy(&bytes[value_start + 2..value_start + 2 + len])
                    .into_owned();
                (value, 2 + len)
            }
            8 => (String::new(), 8), // timestamp
            9 => (String::new(), 16), // uuid
            _ => break,
        };

        if value_type == 7 {
            headers.insert(name, value);
        }
        let advance = value_start + consumed;
        if advance > bytes.len() {
            break;
        }
        bytes = &bytes[advance..];
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_header(name: &str, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.push(7u8);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn build_frame(event_type: &str, payload: &[u8]) -> Vec<u8> {
        let headers = string_header(":event-type", event_type);
        let headers_length = headers.len() as u32;
        let total_length = (PRELUDE_AND_CRC_LEN + headers.len() + payload.len() + TRAILER_CRC_LEN) as u32;

        let mut prelude = Vec::new();
        prelude.extend_from_slice(&total_length.to_be_bytes());
        prelude.extend_from_slice(&headers_length.to_be_bytes());
        let prelude_crc = crc32fast::hash(&prelude);
        prelude.extend_from_slice(&prelude_crc.to_be_bytes());

        let mut frame = prelude;
        frame.extend_from_slice(&headers);
        frame.extend_from_slice(payload);
        let message_crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&message_crc.to_be_bytes());
        frame
    }

    #[test]
    fn parses_content_delta_in_one_shot() {
        let frame = build_frame("assistantResponseEvent", br#"{"content":"Hello"}"#);
        let mut parser = EventStreamParser::new();
        let events = parser.feed(&frame);
        assert_eq!(events, vec![UpstreamEvent::Content("Hello".to_string())]);
    }

    #[test]
    fn feed_splitting_yields_identical_events_to_single_chunk() {
        let frame = build_frame("assistantResponseEvent", br#"{"content":"Hello there"}"#);

        let mut whole = EventStreamParser::new();
        let whole_events = whole.feed(&frame);

        let mut split = EventStreamParser::new();
        let mut split_events = Vec::new();
        for byte in &frame {
            split_events.extend(split.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(whole_events, split_events);
    }

    #[test]
    fn accumulates_streamed_tool_use_fragments() {
        let start = build_frame(
            "toolUseEvent",
            br#"{"toolUseId":"t1","name":"get_weather","input":"{\"city\":"}"#,
        );
        let delta = build_frame("toolUseEvent", br#"{"toolUseId":"t1","input":"\"Tokyo\"}"}"#);
        let stop = build_frame("toolUseEvent", br#"{"toolUseId":"t1","input":"","stop":true}"#);

        let mut parser = EventStreamParser::new();
        assert!(parser.feed(&start).is_empty());
        assert!(parser.feed(&delta).is_empty());
        let events = parser.feed(&stop);

        assert_eq!(
            events,
            vec![UpstreamEvent::ToolCallFragment {
                id: "t1".to_string(),
                name: "get_weather".to_string(),
                args_json: r#"{"city":"Tokyo"}"#.to_string(),
            }]
        );
    }

    #[test]
    fn corrupt_crc_is_discarded_without_desync() {
        let mut frame = build_frame("assistantResponseEvent", br#"{"content":"a"}"#);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let good = build_frame("assistantResponseEvent", br#"{"content":"b"}"#);

        let mut parser = EventStreamParser::new();
        let mut all = frame;
        all.extend_from_slice(&good);
        let events = parser.feed(&all);
        assert_eq!(events, vec![UpstreamEvent::Content("b".to_string())]);
    }

    #[test]
    fn context_usage_percentage_is_parsed() {
        let frame = build_frame("contextUsageEvent", br#"{"percentage":42.5}"#);
        let mut parser = EventStreamParser::new();
        let events = parser.feed(&frame);
        assert_eq!(events, vec![UpstreamEvent::ContextUsagePercent(42.5)]);
    }
}
