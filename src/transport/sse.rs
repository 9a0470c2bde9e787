use bytes::{Buf, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

impl ServerEvent {
    pub fn new(event: &str, data: &str) -> Self {
        Self {
            event: event.to_string(),
            data: data.to_string(),
        }
    }
}

/// Incremental text/event-stream decoder.
///
/// Bytes go in as they arrive off the socket, complete events come out once
/// their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    /// bytes of `buffer` already known to hold no newline
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        self.scanned = self.buffer.len();

        events
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();

        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");

        Some(ServerEvent {
            event: event.unwrap_or_else(|| String::from("message")),
            data,
        })
    }
}
