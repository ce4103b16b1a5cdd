//! Incremental server-sent-event decoder
//!
//! Bytes go in as they arrive from the transport; complete events come out.
//! Lines may end in `\n` or `\r\n` and may be split anywhere across chunks,
//! including inside a multi-byte UTF-8 sequence.

/// One dispatched server-sent event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type from the `event:` field, if any
    pub event: Option<String>,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last event id from the `id:` field, if any
    pub id: Option<String>,
}

/// Line-buffering SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush at end of stream
    ///
    /// A trailing unterminated line is processed and any pending data is
    /// dispatched, so a server that omits the final blank line loses nothing.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').map_or((line, ""), |(f, v)| {
            (f, v.strip_prefix(' ').unwrap_or(v))
        });

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {}
            other => tracing::trace!(field = other, "ignoring unknown sse field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }

        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn test_simple_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: hello world\n\ndata: done\n\n");
        assert_eq!(data(&events), ["hello world", "done"]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: tur").is_empty());
        assert!(decoder.feed(b"n on\r\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(data(&events), ["turn on"]);
    }

    #[test]
    fn test_utf8_split_inside_character() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: 超时了\n\n".as_bytes();
        let (head, tail) = bytes.split_at(8);

        assert!(decoder.feed(head).is_empty());
        let events = decoder.feed(tail);
        assert_eq!(data(&events), ["超时了"]);
    }

    #[test]
    fn test_multiline_data_comments_and_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\nevent: reply\nid: 7\ndata: one\ndata:two\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].event.as_deref(), Some("reply"));
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_blank_lines_without_data_dispatch_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\n\nevent: ping\n\n").is_empty());
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        let event = decoder.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(decoder.finish().is_none());
    }
}
