use bytes::Bytes;

/// One server-sent event: optional `event:` name plus joined `data:` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder. Feed raw chunks as they arrive; complete events
/// are returned as soon as their terminating blank line is seen. Call
/// `finish` once the upstream body ends to flush a trailing event that was
/// not blank-line terminated.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = trim_line(&raw);
            self.take_line(line, &mut out);
        }

        out
    }

    pub fn finish(&mut self) -> Vec<SseMessage> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = trim_line(&raw).to_string();
            self.take_line(&line, &mut out);
        }
        self.flush(&mut out);
        out
    }

    fn take_line(&mut self, line: &str, out: &mut Vec<SseMessage>) {
        if line.is_empty() {
            self.flush(out);
            return;
        }
        // Comment lines keep streams alive; nothing to decode.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn flush(&mut self, out: &mut Vec<SseMessage>) {
        if self.event.is_none() && self.data.is_empty() {
            return;
        }
        out.push(SseMessage {
            event: self.event.take(),
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}

fn trim_line(raw: &[u8]) -> &str {
    let mut line = raw;
    if line.last() == Some(&b'\n') {
        line = &line[..line.len() - 1];
    }
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    std::str::from_utf8(line).unwrap_or("")
}

/// Encode a bare `data:` frame (OpenAI-style streams carry no event name).
pub fn data_frame(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_events_on_blank_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: ping\ndata: {}\n\nevent: done\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[0].data, "{}");
        assert_eq!(events[1].data, "[DONE]");
    }

    #[test]
    fn handles_chunks_split_mid_line() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: hel").is_empty());
        assert!(parser.feed(b"lo\n").is_empty());
        let events = parser.feed(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn joins_multiline_data_and_ignores_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: x\r\ndata: y\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("x"));
        assert_eq!(events[0].data, "y");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }
}
