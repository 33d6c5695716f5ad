//! Incremental server-sent event parser.
//!
//! Chunks may split lines and UTF-8 sequences anywhere; bytes are buffered
//! until a full line is available. A line longer than the configured limit
//! is dropped whole.

/// Default limit for one pending line.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type, `None` for the default `message` type.
    pub event: Option<String>,
    /// Data lines joined with `\n`.
    pub data: String,
}

impl SseFrame {
    /// Whether this frame carries the terminal error event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some("error")
    }
}

/// Line-oriented SSE parser.
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    /// Dropping the rest of an oversized line.
    discarding: bool,
    max_line: usize,
    event: Option<String>,
    data: Vec<String>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl SseParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser holding at most `max_line` bytes of a pending line.
    #[must_use]
    pub const fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
            event: None,
            data: Vec::new(),
        }
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = end + 1;

            if self.discarding {
                self.discarding = false;
            } else {
                let raw = &self.buffer[start..end];
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = String::from_utf8_lossy(raw).into_owned();
                if let Some(frame) = self.process_line(&line) {
                    frames.push(frame);
                }
            }
            start = self.scanned;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            tracing::warn!(
                pending = self.buffer.len(),
                limit = self.max_line,
                "Event stream line too long, dropping it"
            );
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        frames
    }

    /// Bytes held for an incomplete line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').map_or((line, ""), |(f, v)| {
            (f, v.strip_prefix(' ').unwrap_or(v))
        });

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
