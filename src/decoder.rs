//! Incremental UTF-8 decoding for streamed response bodies.
//!
//! Chunk boundaries are arbitrary, so a multi-byte character may arrive split
//! across two reads. The decoder holds the bytes of an unfinished sequence
//! (never more than three) until the rest shows up.

use std::char::REPLACEMENT_CHARACTER;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid UTF-8 sequence at byte {0}")]
    Invalid(usize),
    #[error("stream ended inside a UTF-8 sequence at byte {0}")]
    Incomplete(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Replace malformed input with U+FFFD, the way browser text decoders do
    #[default]
    Lossy,
    /// Fail on the first malformed or truncated sequence
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    mode: DecodeMode,
    pending: Vec<u8>,
    /// Bytes fed so far, for error positions
    fed: usize,
}

impl Utf8Decoder {
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            mode,
            pending: Vec::with_capacity(4),
            fed: 0,
        }
    }

    pub fn lossy() -> Self {
        Self::new(DecodeMode::Lossy)
    }

    pub fn strict() -> Self {
        Self::new(DecodeMode::Strict)
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode one chunk, returning every complete character it finishes.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, DecodeError> {
        let start = self.fed - self.pending.len();
        self.fed += chunk.len();

        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut pos = 0;
        while pos < input.len() {
            match std::str::from_utf8(&input[pos..]) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let valid_end = pos + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&input[pos..valid_end]));
                    match e.error_len() {
                        Some(bad) => {
                            if self.mode == DecodeMode::Strict {
                                return Err(DecodeError::Invalid(start + valid_end));
                            }
                            out.push(REPLACEMENT_CHARACTER);
                            pos = valid_end + bad;
                        }
                        None => {
                            // Unfinished sequence at the end of the input
                            self.pending.extend_from_slice(&input[valid_end..]);
                            break;
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Flush the decoder at end of stream.
    pub fn finish(&mut self) -> Result<String, DecodeError> {
        if self.pending.is_empty() {
            return Ok(String::new());
        }
        let at = self.fed - self.pending.len();
        self.pending.clear();
        match self.mode {
            DecodeMode::Strict => Err(DecodeError::Incomplete(at)),
            DecodeMode::Lossy => Ok(REPLACEMENT_CHARACTER.to_string()),
        }
    }
}
