//! Incremental event-stream frame parser
//!
//! The generation service answers streaming requests with newline-delimited
//! `data: <payload>` lines. A payload is either the `[DONE]` sentinel or a JSON
//! object shaped `{"text": "..."}` (content delta) or `{"done": true}`.
//!
//! Network reads do not respect line boundaries, so the parser keeps the
//! unterminated tail of every read (as raw bytes, which also keeps multi-byte
//! UTF-8 sequences intact) and only acts on complete lines. Lines that fail to
//! parse are logged and dropped; they never end the stream. So are lines
//! longer than [`MAX_LINE_BYTES`], which are never buffered whole.

use crate::provider::constants::{DATA_PREFIX, DONE_SENTINEL, MAX_LINE_BYTES};
use serde::Deserialize;
use tracing::{debug, warn};

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental content to append
    Text(String),
    /// End of stream (`[DONE]` or `{"done": true}`)
    Done,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    text: Option<String>,
}

/// Line-buffering parser for one streaming response
///
/// Each read is scanned once: the parser remembers how far it has already
/// looked for a newline. A line longer than the cap is dropped whole and
/// counted as skipped.
#[derive(Debug)]
pub struct FrameParser {
    buffer: Vec<u8>,
    // Bytes of `buffer` already searched for a newline
    scanned: usize,
    max_line_bytes: usize,
    // Inside an oversized line, waiting for its newline
    discarding: bool,
    finished: bool,
    skipped: usize,
}

enum Parsed {
    Frame(Frame),
    Nothing,
    Malformed,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }
}

impl FrameParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that drops lines longer than `max_line_bytes`
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            finished: false,
            skipped: 0,
        }
    }

    /// Feed raw bytes, returning the frames completed by them
    ///
    /// Nothing is returned once a terminal frame has been seen.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = end + 1;
            let line_start = std::mem::replace(&mut consumed, end + 1);

            if self.discarding {
                // Tail of an oversized line
                self.discarding = false;
                continue;
            }

            match parse_line(&self.buffer[line_start..end]) {
                Parsed::Frame(frame) => {
                    let done = frame == Frame::Done;
                    frames.push(frame);
                    if done {
                        self.finish_stream();
                        return frames;
                    }
                }
                Parsed::Nothing => {}
                Parsed::Malformed => self.skipped += 1,
            }
        }

        self.scanned = self.buffer.len();
        self.buffer.drain(..consumed);
        self.scanned -= consumed;

        if self.buffer.len() > self.max_line_bytes {
            if !self.discarding {
                warn!(
                    limit = self.max_line_bytes,
                    "Dropping stream line longer than the limit"
                );
                self.skipped += 1;
                self.discarding = true;
            }
            self.buffer.clear();
            self.scanned = 0;
        }
        frames
    }

    /// Flush a final line that arrived without a trailing newline
    ///
    /// Called when the body ends.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.finished || self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        let frames = match parse_line(&line) {
            Parsed::Frame(frame) => vec![frame],
            Parsed::Nothing => Vec::new(),
            Parsed::Malformed => {
                self.skipped += 1;
                Vec::new()
            }
        };
        if frames.contains(&Frame::Done) {
            self.finish_stream();
        }
        frames
    }

    /// Whether a terminal frame has been parsed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of payload lines dropped as malformed or oversized
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    fn finish_stream(&mut self) {
        self.finished = true;
        self.buffer.clear();
        self.scanned = 0;
    }
}

fn parse_line(raw: &[u8]) -> Parsed {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => {
            warn!(error = %e, "Dropping non UTF-8 stream line");
            return Parsed::Malformed;
        }
    };

    // Blank separators, comments and other SSE fields carry nothing for us
    let Some(data) = line.strip_prefix(DATA_PREFIX).map(str::trim) else {
        return Parsed::Nothing;
    };
    if data == DONE_SENTINEL {
        return Parsed::Frame(Frame::Done);
    }

    match serde_json::from_str::<Payload>(data) {
        Ok(payload) if payload.done => Parsed::Frame(Frame::Done),
        Ok(Payload {
            text: Some(text), ..
        }) if !text.is_empty() => Parsed::Frame(Frame::Text(text)),
        Ok(_) => {
            debug!(payload = %data, "Stream frame without content");
            Parsed::Nothing
        }
        Err(e) => {
            warn!(error = %e, payload = %data, "Failed to parse streaming chunk");
            Parsed::Malformed
        }
    }
}
