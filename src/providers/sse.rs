//! Minimal server-sent events decoder for streamed chat completions.
//!
//! Only `data:` lines matter here. Bytes arrive in arbitrary slices, so a line
//! may be split across network chunks; incomplete lines stay buffered until
//! their newline arrives.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    /// The `[DONE]` sentinel that ends an OpenAI-style stream
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes; returns the events completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(payload) = line.strip_prefix("data:") else {
                // Comments, `event:`/`id:` fields and blank separators
                continue;
            };
            let payload = payload.strip_prefix(' ').unwrap_or(payload);

            if payload == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !payload.is_empty() {
                events.push(SseEvent::Data(payload.to_string()));
            }
        }
        events
    }

    pub fn has_partial_line(&self) -> bool {
        !self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        assert!(decoder.has_partial_line());
        assert_eq!(
            decoder.feed(b"1}\r\n\r\ndata: [DONE]\n\n"),
            vec![SseEvent::Data("{\"a\":1}".into()), SseEvent::Done]
        );
        assert!(!decoder.has_partial_line());
    }

    #[test]
    fn test_non_data_lines_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\nevent: message\nid: 4\ndata:{\"b\":2}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"b\":2}".into())]);
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let bytes = "data: héllo\n".as_bytes();
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&bytes[..8]).is_empty());
        assert_eq!(decoder.feed(&bytes[8..]), vec![SseEvent::Data("héllo".into())]);
    }
}
