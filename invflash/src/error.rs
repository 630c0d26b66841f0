//! Error types for invflash.

use std::io;
use thiserror::Error;

use crate::protocol::fatal::FatalCode;

/// Result type for invflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for invflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The user or environment did not provide a device to connect to.
    #[error("No serial device selected")]
    NoDeviceSelected,

    /// A selected device could not be opened.
    #[error("Could not open port {port}: {reason}")]
    PortOpen {
        /// Port name/path.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// An operation required an open port.
    #[error("Port is not open")]
    PortClosed,

    /// The write handle could not be acquired.
    #[error("Could not acquire write handle after {attempts} attempts: {reason}")]
    WriteHandle {
        /// Number of attempts made.
        attempts: usize,
        /// Last failure.
        reason: String,
    },

    /// The device went away while in use.
    #[error("Device disconnected")]
    Disconnected,

    /// No matching acknowledgement arrived in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device reported a fatal error code.
    #[error("Device error: {0}")]
    Device(FatalCode),

    /// The firmware image could not be obtained or is empty.
    #[error("Firmware image unavailable: {0}")]
    ImageUnavailable(String),

    /// Firmware catalog error.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the link to the device is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected | Self::PortClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
            ),
            #[cfg(feature = "native")]
            Self::Serial(e) => e.kind() == serialport::ErrorKind::NoDevice,
            _ => false,
        }
    }
}
