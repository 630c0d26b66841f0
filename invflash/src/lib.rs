//! # invflash
//!
//! Firmware update engine for inverter controllers over a serial link.
//!
//! The engine is split in two layers:
//!
//! - **Transport** ([`transport::PortSession`]): owns the serial port, turns
//!   the raw byte stream into 60-byte frames and fans them out to
//!   subscribers.
//! - **Update** ([`update::UpdateSession`]): the unlock / erase / write /
//!   complete / verify / restart state machine, with per-step deadlines and
//!   device-reported fatal codes.
//!
//! [`update::Updater`] wires the two together and drives an update to the
//! end.
//!
//! ## Supported targets
//!
//! - ARM controller (STM32)
//! - DSP controller (TMS320)
//!
//! ## Features
//!
//! - `native` (default): serial ports through the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use invflash::{TargetType, UpdateConfig, Updater};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         use invflash::{FirmwareImage, NativeConnector, PortSession};
//!
//!         let image = FirmwareImage::from_file(TargetType::Arm, "arm.bin")?;
//!
//!         let mut connector = NativeConnector::new();
//!         connector.authorize("/dev/ttyUSB0");
//!         let mut port = PortSession::new(connector);
//!         if !port.auto_connect()? {
//!             port.connect()?;
//!         }
//!
//!         let mut updater = Updater::new(port, UpdateConfig::default());
//!         let done = updater.run(
//!             TargetType::Arm,
//!             image.bytes,
//!             |s| println!("{:>3}% {}", s.percent, s.message),
//!             || false,
//!         )?;
//!         println!("{}", done.message);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transport;
pub mod update;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
#[cfg(feature = "native")]
pub use transport::{NativeConnector, PortSelector};
pub use {
    device::{DetectedPort, DeviceKind, detect_ports, rank_ports},
    error::{Error, Result},
    image::{Catalog, CatalogImageProvider, FileImageProvider, FirmwareImage, ImageProvider},
    port::{Port, SerialConfig},
    protocol::{FRAME_LEN, FatalCode, Frame, TargetType},
    transport::{Connector, PortSession, PortState, SessionConfig, Subscription},
    update::{UpdateConfig, UpdateSession, UpdateSnapshot, UpdateState, Updater},
};
