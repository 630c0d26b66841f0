//! Re-framing of the raw serial byte stream.
//!
//! Reads return arbitrary-sized chunks. Short chunks are accumulated until at
//! least [`FRAME_LEN`] bytes are buffered, then the whole buffer is released
//! as one frame. A chunk that is already [`FRAME_LEN`] bytes or longer is
//! released as-is and the buffer is dropped.
//!
//! This is not a general framing protocol: a single read carrying more than
//! one frame is still delivered as one frame, and short chunks that overrun
//! [`FRAME_LEN`] together are released together.

use crate::protocol::FRAME_LEN;

/// Accumulation buffer for incoming bytes.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN * 2),
        }
    }

    /// Feed one read's worth of bytes; returns a complete frame if one is ready.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk.len() >= FRAME_LEN {
            self.buf.clear();
            return Some(chunk.to_vec());
        }

        self.buf.extend_from_slice(chunk);
        if self.buf.len() >= FRAME_LEN {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially accumulated frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
