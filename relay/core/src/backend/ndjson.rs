//! Newline-Delimited JSON Decoding
//!
//! The Ollama generate endpoint streams one JSON object per line. Network reads
//! do not respect line boundaries (or UTF-8 boundaries), so bytes are buffered
//! until a full line is available.

use serde::Deserialize;

/// One line of an Ollama `/api/generate` stream
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateChunk {
    /// Text fragment, absent on some status lines
    #[serde(default)]
    pub response: Option<String>,
    /// Terminal marker
    #[serde(default)]
    pub done: bool,
    /// Backend-side failure
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateChunk {
    /// The fragment text, if non-empty
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.response.as_deref().filter(|text| !text.is_empty())
    }
}

/// A line that could not be decoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedLine {
    /// The offending line (lossily decoded, truncated for logging)
    pub line: String,
    /// Parser error
    pub error: String,
}

const MAX_LOGGED_LINE: usize = 200;

/// Longest line the decoder accepts, in bytes
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Incremental NDJSON line decoder
///
/// Each byte is scanned for a newline once. A line longer than the limit is
/// reported once as malformed and the rest of it is dropped up to the next
/// newline, so a backend that never ends its line cannot grow the buffer
/// without bound.
#[derive(Debug)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    /// Start of the first unconsumed line
    start: usize,
    /// Bytes before this offset hold no newline
    scanned: usize,
    max_line_len: usize,
    /// Inside an over-long line that was already reported
    discarding: bool,
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl NdjsonDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with a custom line length limit
    #[must_use]
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            max_line_len: max_line_len.max(1),
            discarding: false,
        }
    }

    /// Append bytes from the network
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet forming a complete line
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Decode the next complete line
    ///
    /// Blank lines are skipped. Returns `None` when no complete line is buffered.
    pub fn next_line(&mut self) -> Option<Result<GenerateChunk, MalformedLine>> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n')
            else {
                return self.await_more();
            };
            let end = self.scanned + offset;
            let line_start = self.start;
            self.start = end + 1;
            self.scanned = self.start;

            if std::mem::take(&mut self.discarding) {
                // Tail of a line already reported as too long
                continue;
            }

            let line = &self.buffer[line_start..end];
            if line.len() > self.max_line_len {
                return Some(Err(overlong_line(line, self.max_line_len)));
            }
            if let Some(decoded) = decode_line(line) {
                return Some(decoded);
            }
        }
    }

    /// Decode whatever is left once the stream has closed
    pub fn finish(&mut self) -> Option<Result<GenerateChunk, MalformedLine>> {
        let discarding = std::mem::take(&mut self.discarding);
        let rest = self.buffer.split_off(self.start);
        self.buffer.clear();
        self.start = 0;
        self.scanned = 0;

        if discarding {
            return None;
        }
        if rest.len() > self.max_line_len {
            return Some(Err(overlong_line(&rest, self.max_line_len)));
        }
        decode_line(&rest)
    }

    /// Compact the buffer while waiting for the rest of a line
    fn await_more(&mut self) -> Option<Result<GenerateChunk, MalformedLine>> {
        self.buffer.drain(..self.start);
        self.start = 0;
        self.scanned = self.buffer.len();

        if self.discarding {
            self.buffer.clear();
            self.scanned = 0;
            return None;
        }
        if self.buffer.len() > self.max_line_len {
            let malformed = overlong_line(&self.buffer, self.max_line_len);
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
            return Some(Err(malformed));
        }
        None
    }
}

fn decode_line(raw: &[u8]) -> Option<Result<GenerateChunk, MalformedLine>> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }

    Some(serde_json::from_slice(trimmed).map_err(|e| MalformedLine {
        line: log_excerpt(trimmed),
        error: e.to_string(),
    }))
}

fn overlong_line(raw: &[u8], max_line_len: usize) -> MalformedLine {
    MalformedLine {
        line: log_excerpt(raw),
        error: format!("line exceeds {max_line_len} bytes"),
    }
}

/// Lossy, truncated copy of a line for logging
fn log_excerpt(raw: &[u8]) -> String {
    let cut = raw.len().min(MAX_LOGGED_LINE);
    let mut line = String::from_utf8_lossy(&raw[..cut]).into_owned();
    if line.len() > MAX_LOGGED_LINE {
        let mut cut = MAX_LOGGED_LINE;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }
    line
}
