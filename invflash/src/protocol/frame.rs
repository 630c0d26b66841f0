//! Fixed-length command frames.
//!
//! Every command sent to the inverter is exactly [`FRAME_LEN`] bytes. Shorter
//! templates are zero-padded. There is no length prefix and no checksum.

use std::fmt;

/// Size of every frame exchanged with the device.
pub const FRAME_LEN: usize = 60;

/// A zero-padded, fixed-length command frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// An all-zero frame.
    pub const EMPTY: Self = Self([0; FRAME_LEN]);

    /// Build a frame from a short prefix, zero-filling the remainder.
    ///
    /// Usable in `const` context so command templates can be statics.
    /// Prefixes longer than [`FRAME_LEN`] are truncated.
    pub const fn padded(prefix: &[u8]) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        let mut i = 0;
        while i < prefix.len() && i < FRAME_LEN {
            bytes[i] = prefix[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Frame contents.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Mutable frame contents.
    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.0
    }

    /// Opcode byte.
    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    /// Sub-opcode / length byte.
    pub fn sub_opcode(&self) -> u8 {
        self.0[1]
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Trailing zero padding is noise in logs.
        let used = self
            .0
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        write!(f, "Frame[{}] {}", FRAME_LEN, hex(&self.0[..used]))
    }
}

/// Format bytes as space separated hex, for trace logging.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
