//! Incremental Server-Sent Events parser for the client reader task.
//!
//! Bytes arrive in arbitrary chunks; events are complete only at a blank
//! line. Comment lines (keep-alives) are skipped.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the server sent none
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some((end, skip)) = find_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + skip).take(end).collect();
            if let Some(event) = parse_event(&String::from_utf8_lossy(&raw)) {
                events.push(event);
            }
        }
        events
    }
}

/// Position of the first blank line and the length of its terminator.
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.find(':') {
            Some(pos) => (&line[..pos], line[pos + 1..].strip_prefix(' ').unwrap_or(&line[pos + 1..])),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => tracing::trace!(field, "ignoring SSE field"),
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: endpoint\nda").is_empty());
        let events = parser.feed(b"ta: /message?sessionId=42\n\nevent: mess");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/message?sessionId=42".into(),
            }]
        );
        let events = parser.feed(b"age\ndata: {\"a\":1}\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn keepalive_comments_yield_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": ping\n\n: ping\n\n").is_empty());
    }

    #[test]
    fn multiline_data_and_crlf() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: a\r\ndata: b\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "a\nb".into(),
            }]
        );
    }
}
