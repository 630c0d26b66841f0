//! Inverter bootloader wire protocol.

pub mod commands;
pub mod fatal;
pub mod frame;

// Re-export common types
pub use commands::{AckPattern, CHUNK_LEN, DataWrite, TargetProfile, TargetType, packet_count};
pub use fatal::FatalCode;
pub use frame::{FRAME_LEN, Frame};
