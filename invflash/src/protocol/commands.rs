//! Command templates and acknowledgement patterns for the inverter bootloader.
//!
//! ## Command sequence
//!
//! ```text
//! host                                   device
//!  | -- unlock (05 12|14)             --> |
//!  | <-- 03 21 34                         |
//!  | -- erase  (03 01 00 00 12|14)    --> |
//!  | <-- 03 02 34                         |
//!  | -- data write (03 03 len 00 addr data) x N
//!  | <-- 03 04 34                         |
//!  | -- data complete (03 05)         --> |
//!  | <-- 03 06 34                         |
//!  | -- verify (03 07)                --> |
//!  | <-- 03 08 34                         |
//!  | -- restart (03 0b)               --> |
//!  | <-- 03 0c 34                         |
//! ```
//!
//! ## Data write frame
//!
//! ```text
//! +--------+--------+-----------+------------------+---------+
//! | opcode | length |  address  |      data        | padding |
//! +--------+--------+-----------+------------------+---------+
//! | 03 03  | tag 00 | u32 LE    | up to 48 bytes   | zeros   |
//! +--------+--------+-----------+------------------+---------+
//! ```
//!
//! The DSP bootloader counts addresses in 24-byte units, so its length tag
//! is 0x18 while each packet still carries 48 payload bytes.

use {
    crate::{
        error::{Error, Result},
        protocol::frame::Frame,
    },
    byteorder::{ByteOrder, LittleEndian},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

/// Image bytes carried by one data write frame.
pub const CHUNK_LEN: usize = 48;

/// Opcode and sub-opcode of the data write command.
pub const DATA_WRITE_OPCODE: [u8; 2] = [0x03, 0x03];

/// Offset of the 16-bit length tag within a data write frame.
const LENGTH_TAG_OFFSET: usize = 2;

/// Offset of the destination address within a data write frame.
const ADDRESS_OFFSET: usize = 4;

/// Offset of the image payload within a data write frame.
const PAYLOAD_OFFSET: usize = 8;

/// Unlock ("enter update mode") for the ARM controller.
pub const UNLOCK_ARM: Frame = Frame::padded(&[0x05, 0x12]);
/// Unlock ("enter update mode") for the DSP controller.
pub const UNLOCK_DSP: Frame = Frame::padded(&[0x05, 0x14]);
/// Flash erase for the ARM controller.
pub const ERASE_ARM: Frame = Frame::padded(&[0x03, 0x01, 0x00, 0x00, 0x12]);
/// Flash erase for the DSP controller.
pub const ERASE_DSP: Frame = Frame::padded(&[0x03, 0x01, 0x00, 0x00, 0x14]);
/// All image data has been sent.
pub const DATA_COMPLETE: Frame = Frame::padded(&[0x03, 0x05]);
/// Verify the programmed flash.
pub const VERIFY: Frame = Frame::padded(&[0x03, 0x07]);
/// Restart the inverter into the new firmware.
pub const RESTART: Frame = Frame::padded(&[0x03, 0x0b]);

/// Acknowledgement for the unlock command.
pub const UNLOCK_ACK: AckPattern = AckPattern::new(&[0x03, 0x21, 0x34]);
/// Acknowledgement for the erase command.
pub const ERASE_ACK: AckPattern = AckPattern::new(&[0x03, 0x02, 0x34]);
/// Acknowledgement for each data write.
pub const DATA_WRITTEN_ACK: AckPattern = AckPattern::new(&[0x03, 0x04, 0x34]);
/// Acknowledgement for data complete.
pub const DATA_COMPLETE_ACK: AckPattern = AckPattern::new(&[0x03, 0x06, 0x34]);
/// Acknowledgement for verify.
pub const VERIFY_ACK: AckPattern = AckPattern::new(&[0x03, 0x08, 0x34]);
/// Acknowledgement for restart.
pub const RESTART_ACK: AckPattern = AckPattern::new(&[0x03, 0x0c, 0x34]);

/// Leading bytes a response must carry to acknowledge a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPattern(&'static [u8]);

impl AckPattern {
    /// Create a pattern from its prefix bytes.
    pub const fn new(prefix: &'static [u8]) -> Self {
        Self(prefix)
    }

    /// Pattern bytes.
    pub fn bytes(&self) -> &'static [u8] {
        self.0
    }

    /// Whether `frame` starts with this pattern. Trailing bytes are ignored,
    /// responses shorter than the pattern never match.
    pub fn matches(&self, frame: &[u8]) -> bool {
        frame.starts_with(self.0)
    }
}

/// Which on-board processor receives the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// ARM-class controller (STM32).
    #[default]
    #[serde(alias = "stm32", alias = "armType")]
    Arm,
    /// DSP-class controller (TMS320).
    #[serde(alias = "tms320", alias = "dspType")]
    Dsp,
}

impl TargetType {
    /// Both targets.
    pub const ALL: [Self; 2] = [Self::Arm, Self::Dsp];

    /// Command set and addressing for this target.
    pub fn profile(self) -> &'static TargetProfile {
        match self {
            Self::Arm => &ARM_PROFILE,
            Self::Dsp => &DSP_PROFILE,
        }
    }

    /// Short identifier used in configuration and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::Dsp => "dsp",
        }
    }

    /// Image type name used by the firmware catalog.
    pub fn catalog_type(self) -> &'static str {
        match self {
            Self::Arm => "stm32app_inverter",
            Self::Dsp => "tms320app_inverter",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arm => write!(f, "ARM (STM32)"),
            Self::Dsp => write!(f, "DSP (TMS320)"),
        }
    }
}

impl FromStr for TargetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "arm" | "armtype" | "stm32" => Ok(Self::Arm),
            "dsp" | "dsptype" | "tms320" => Ok(Self::Dsp),
            other => Err(Error::Config(format!("unknown target type '{other}'"))),
        }
    }
}

/// Target-specific commands and data addressing.
#[derive(Debug)]
pub struct TargetProfile {
    /// Unlock command.
    pub unlock: Frame,
    /// Erase command.
    pub erase: Frame,
    /// Flash address of the first data packet.
    pub start_address: u32,
    /// Length tag written into each data packet; also the address stride.
    pub length_tag: u8,
}

/// ARM controller profile.
pub static ARM_PROFILE: TargetProfile = TargetProfile {
    unlock: UNLOCK_ARM,
    erase: ERASE_ARM,
    start_address: 0x0800_D000,
    length_tag: 0x30,
};

/// DSP controller profile.
pub static DSP_PROFILE: TargetProfile = TargetProfile {
    unlock: UNLOCK_DSP,
    erase: ERASE_DSP,
    start_address: 0x0008_4000,
    length_tag: 0x18,
};

/// A built data write frame.
#[derive(Debug, Clone, Copy)]
pub struct DataWrite {
    /// Frame to send.
    pub frame: Frame,
    /// Destination address encoded in the frame.
    pub address: u32,
    /// Image bytes copied into the frame.
    pub copied: usize,
}

impl TargetProfile {
    /// Destination address of the packet starting at image offset `cursor`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn address_for(&self, cursor: usize) -> u32 {
        // Safe cast: firmware images are always < 4GB
        let index = (cursor / CHUNK_LEN) as u32;
        self.start_address
            .wrapping_add(index.wrapping_mul(u32::from(self.length_tag)))
    }

    /// Build the data write frame for the chunk of `image` at `cursor`.
    ///
    /// The last chunk may be short; unused payload bytes stay zero. The
    /// caller advances its cursor by [`DataWrite::copied`].
    pub fn data_write(&self, image: &[u8], cursor: usize) -> DataWrite {
        let mut frame = Frame::EMPTY;
        let address = self.address_for(cursor);
        let remaining = image.len().saturating_sub(cursor);
        let copied = remaining.min(CHUNK_LEN);

        let bytes = frame.as_mut_bytes();
        bytes[..2].copy_from_slice(&DATA_WRITE_OPCODE);
        LittleEndian::write_u16(
            &mut bytes[LENGTH_TAG_OFFSET..ADDRESS_OFFSET],
            u16::from(self.length_tag),
        );
        LittleEndian::write_u32(&mut bytes[ADDRESS_OFFSET..PAYLOAD_OFFSET], address);
        bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + copied]
            .copy_from_slice(&image[cursor..cursor + copied]);

        DataWrite {
            frame,
            address,
            copied,
        }
    }
}

/// Number of data write frames needed for an image of `len` bytes.
pub fn packet_count(len: usize) -> usize {
    len.div_ceil(CHUNK_LEN)
}
