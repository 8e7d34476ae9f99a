//! Newline framing for the text protocol
//!
//! TCP delivers a byte stream, so each frame travels with a trailing `\n`.
//! Frames themselves never contain a newline.

pub const FRAME_TERMINATOR: u8 = b'\n';
pub const MAX_FRAME_LEN: usize = 8192;

/// Errors that can occur while splitting the byte stream into frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("Frame too large: {0} bytes (max {1})")]
    FrameTooLarge(usize, usize),
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Appends the terminator to a frame for transmission
pub fn encode_frame(frame: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() + 1);
    bytes.extend_from_slice(frame.as_bytes());
    bytes.push(FRAME_TERMINATOR);
    bytes
}

/// Accumulates received bytes and hands out complete frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete frame, skipping blank lines
    ///
    /// An unterminated run longer than [`MAX_FRAME_LEN`] is an error and the
    /// buffered bytes are discarded.
    pub fn next_frame(&mut self) -> Option<Result<String, FramingError>> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == FRAME_TERMINATOR) else {
                if self.buffer.len() > MAX_FRAME_LEN {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Some(Err(FramingError::FrameTooLarge(len, MAX_FRAME_LEN)));
                }
                return None;
            };

            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_FRAME_LEN {
                return Some(Err(FramingError::FrameTooLarge(line.len(), MAX_FRAME_LEN)));
            }
            return Some(String::from_utf8(line).map_err(|_| FramingError::InvalidUtf8));
        }
    }
}
