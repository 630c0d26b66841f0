//! Fatal status codes reported by the device.
//!
//! When a stage fails the device answers with a frame whose second byte is
//! one of these codes. Anything else that does not match the outstanding
//! acknowledgement is a repeat of an older ack and is ignored.

use std::fmt;

/// Byte index of the status code within a response frame.
pub const STATUS_INDEX: usize = 1;

/// A device-reported, unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FatalCode {
    /// Generic fatal error; the image must be re-sent.
    Fatal = 0x09,
    /// Flash verification failed.
    VerifyFailure = 0xFA,
    /// Flash could not be unlocked.
    UnlockFailure = 0xFB,
    /// Flash erase failed.
    EraseFailure = 0xFD,
    /// Flash programming failed.
    ProgramFailure = 0xFE,
}

impl FatalCode {
    /// All known codes.
    pub const ALL: [Self; 5] = [
        Self::Fatal,
        Self::VerifyFailure,
        Self::UnlockFailure,
        Self::EraseFailure,
        Self::ProgramFailure,
    ];

    /// Map a raw status byte to a fatal code.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|code| *code as u8 == byte)
    }

    /// Inspect a response frame for a fatal status byte.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        frame
            .get(STATUS_INDEX)
            .copied()
            .and_then(Self::from_byte)
    }

    /// Operator-facing description.
    pub fn message(self) -> &'static str {
        match self {
            Self::Fatal => "Fatal Error - Resend Image.",
            Self::VerifyFailure => "Flash verify error.",
            Self::UnlockFailure => "Flash unlock failure.",
            Self::EraseFailure => "Flash erase failure.",
            Self::ProgramFailure => "Flash programming failure.",
        }
    }
}

impl fmt::Display for FatalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte() {
        assert_eq!(FatalCode::from_byte(0x09), Some(FatalCode::Fatal));
        assert_eq!(FatalCode::from_byte(0xFA), Some(FatalCode::VerifyFailure));
        assert_eq!(FatalCode::from_byte(0xFB), Some(FatalCode::UnlockFailure));
        assert_eq!(FatalCode::from_byte(0xFD), Some(FatalCode::EraseFailure));
        assert_eq!(FatalCode::from_byte(0xFE), Some(FatalCode::ProgramFailure));
        assert_eq!(FatalCode::from_byte(0xFC), None);
        assert_eq!(FatalCode::from_byte(0x21), None);
    }

    #[test]
    fn test_from_frame_uses_second_byte() {
        assert_eq!(
            FatalCode::from_frame(&[0x03, 0xFD, 0x34]),
            Some(FatalCode::EraseFailure)
        );
        assert_eq!(FatalCode::from_frame(&[0xFD]), None);
        assert_eq!(FatalCode::from_frame(&[]), None);
        assert_eq!(FatalCode::from_frame(&[0x03, 0x02, 0x34]), None);
    }
}
