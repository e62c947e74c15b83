// Extracts top-level JSON objects from an unframed TCP byte stream.
//
// Control clients write bare JSON objects back to back, with arbitrary
// whitespace between them and arbitrary chunking by the transport. The framer
// keeps one growing buffer per connection and scans it for balanced braces,
// handing each complete object to serde_json.
//
// Quote handling is deliberately shallow: every `"` toggles the in-string
// flag, escapes are not tracked. A valid JSON string contains an even number
// of `"` bytes (each `\"` still contributes one), so the flag is balanced
// across any well-formed input. Unbalanced quotes desync the scanner until
// the next malformed-frame reset clears the buffer.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The buffer did not start with `{`, or braces went negative. The
    /// buffer has been cleared; the connection stays up.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    /// A balanced region failed to parse as JSON. The buffer has been
    /// cleared; the connection stays up.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-connection receive buffer and scanner state.
#[derive(Default)]
pub struct JsonFramer {
    buf: Vec<u8>,
}

impl JsonFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to extract the next complete top-level object.
    ///
    /// `Ok(Some(v))` yields one object and retains the tail; `Ok(None)` means
    /// more data is needed; `Err` means the buffer was discarded and scanning
    /// restarts clean on the next push.
    pub fn next_object(&mut self) -> Result<Option<Value>, FrameError> {
        let start = self
            .buf
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buf.len());
        if start > 0 {
            self.buf.drain(..start);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf[0] != b'{' {
            self.buf.clear();
            return Err(FrameError::Malformed("expected '{'"));
        }

        let mut in_string = false;
        let mut nesting = 0i32;
        for pos in 0..self.buf.len() {
            let c = self.buf[pos];
            if c == b'"' {
                in_string = !in_string;
            }
            if in_string {
                continue;
            }
            if c == b'{' {
                nesting += 1;
            } else if c == b'}' {
                nesting -= 1;
                if nesting < 0 {
                    self.buf.clear();
                    return Err(FrameError::Malformed("unbalanced '}'"));
                }
                if nesting == 0 {
                    let parsed = serde_json::from_slice(&self.buf[..=pos]);
                    match parsed {
                        Ok(value) => {
                            self.buf.drain(..=pos);
                            return Ok(Some(value));
                        }
                        Err(e) => {
                            self.buf.clear();
                            return Err(e.into());
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.buf.len()
    }
}
