use thiserror::Error;
use tracing::{info, warn};

use super::diag_enabled;

/// Largest frame the assembler will buffer before giving up on it.
pub const MAX_FRAME_BYTES: usize = 1 << 16;

/// Written after every outbound frame. Readers treat it like whitespace.
pub const FRAME_TERMINATOR: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeded {limit} bytes without closing; {dropped} bytes discarded")]
    Oversized { limit: usize, dropped: usize },
}

/// Splits a byte stream of back-to-back JSON objects into one string per object.
///
/// Scanning is structural: it tracks brace depth outside of string literals, so objects
/// may arrive split across reads, several per read, with or without a NUL between them.
/// Bytes between objects that are not whitespace or NUL are skipped.
///
/// An object that outgrows the limit is abandoned: its bytes are discarded up to the
/// brace that closes it, so nothing nested inside it surfaces as a frame.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    cursor: usize,
    frame_start: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    discarding: bool,
    max_frame_bytes: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            frame_start: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            discarding: false,
            max_frame_bytes: max_frame_bytes.max(2),
        }
    }

    /// Feeds freshly read bytes and appends every completed frame to `out`.
    /// Returns how many frames were appended.
    pub fn push(&mut self, bytes: &[u8], out: &mut Vec<String>) -> Result<usize, FrameError> {
        self.buffer.extend_from_slice(bytes);

        let mut emitted = 0usize;
        let mut stray = 0usize;
        let mut index = self.cursor;
        while index < self.buffer.len() {
            let byte = self.buffer[index];
            if self.depth == 0 {
                if byte == b'{' {
                    self.depth = 1;
                    self.frame_start = index;
                } else if !is_separator(byte) {
                    stray = stray.saturating_add(1);
                }
            } else if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' => self.in_string = true,
                    b'{' => self.depth = self.depth.saturating_add(1),
                    b'}' => {
                        self.depth -= 1;
                        if self.depth == 0 && self.discarding {
                            self.discarding = false;
                        } else if self.depth == 0 {
                            let frame = &self.buffer[self.frame_start..=index];
                            match std::str::from_utf8(frame) {
                                Ok(text) => {
                                    if diag_enabled() {
                                        info!(frame = %text, "voxwire_diag_frame_read");
                                    }
                                    out.push(text.to_owned());
                                    emitted = emitted.saturating_add(1);
                                }
                                Err(err) => warn!(error = %err, "frame_invalid_utf8_dropped"),
                            }
                        }
                    }
                    _ => {}
                }
            }
            index += 1;
        }

        if stray > 0 {
            warn!(stray, "frame_stray_bytes_skipped");
        }

        if self.depth > 0 && !self.discarding {
            self.buffer.drain(..self.frame_start);
        } else {
            self.buffer.clear();
        }
        self.frame_start = 0;
        self.cursor = self.buffer.len();

        if self.buffer.len() > self.max_frame_bytes {
            let dropped = self.buffer.len();
            self.buffer.clear();
            self.cursor = 0;
            self.discarding = true;
            return Err(FrameError::Oversized {
                limit: self.max_frame_bytes,
                dropped,
            });
        }
        Ok(emitted)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.frame_start = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.discarding = false;
    }
}

fn is_separator(byte: u8) -> bool {
    byte == FRAME_TERMINATOR || byte.is_ascii_whitespace()
}

pub fn encode_frame(frame: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(frame.len() + 1);
    payload.extend_from_slice(frame.as_bytes());
    payload.push(FRAME_TERMINATOR);
    payload
}
