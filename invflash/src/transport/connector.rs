//! Device selection and opening.
//!
//! A [`Connector`] is how a [`PortSession`](super::PortSession) obtains a
//! port: either by asking the operator to pick one (manual connect) or by
//! reusing a device that was authorised earlier (auto-connect).

use crate::error::Result;
use crate::port::Port;

#[cfg(feature = "native")]
pub use native_impl::{NativeConnector, PortSelector};

/// Source of ports for a port session.
pub trait Connector {
    /// Port type produced by [`Connector::open`].
    type Port: Port;

    /// Ask the operator or environment to choose a device.
    ///
    /// `Ok(None)` means nothing was selected.
    fn request_port(&mut self) -> Result<Option<String>>;

    /// Devices that may be opened without prompting, most preferred first.
    fn authorized_ports(&mut self) -> Result<Vec<String>>;

    /// Open `name` at the bootloader baud rate.
    fn open(&mut self, name: &str) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
mod native_impl {
    use log::debug;

    use super::Connector;
    use crate::device::{DetectedPort, detect_ports, rank_ports};
    use crate::error::{Error, Result};
    use crate::port::{NativePort, SerialConfig};

    /// Chooses one of the discovered ports, `Ok(None)` if the operator declined.
    pub type PortSelector = Box<dyn FnMut(&[DetectedPort]) -> Result<Option<String>> + Send>;

    /// Connector backed by the `serialport` crate.
    pub struct NativeConnector {
        authorized: Vec<String>,
        selector: PortSelector,
    }

    impl NativeConnector {
        /// Connector that picks the highest ranked discovered port.
        pub fn new() -> Self {
            Self {
                authorized: Vec::new(),
                selector: Box::new(|ports| Ok(ports.first().map(|p| p.name.clone()))),
            }
        }

        /// Use `selector` to choose among discovered ports on manual connect.
        #[must_use]
        pub fn with_selector(mut self, selector: PortSelector) -> Self {
            self.selector = selector;
            self
        }

        /// Remember `name` as usable without prompting.
        pub fn authorize(&mut self, name: impl Into<String>) {
            let name = name.into();
            if !self.authorized.contains(&name) {
                self.authorized.push(name);
            }
        }
    }

    impl Default for NativeConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Connector for NativeConnector {
        type Port = NativePort;

        fn request_port(&mut self) -> Result<Option<String>> {
            let ports = rank_ports(detect_ports());
            debug!("{} serial port(s) available for selection", ports.len());
            (self.selector)(&ports)
        }

        fn authorized_ports(&mut self) -> Result<Vec<String>> {
            let present: Vec<String> = detect_ports().into_iter().map(|p| p.name).collect();
            // Only offer remembered devices that are actually plugged in
            Ok(self
                .authorized
                .iter()
                .filter(|name| present.iter().any(|p| p == *name))
                .cloned()
                .collect())
        }

        fn open(&mut self, name: &str) -> Result<NativePort> {
            NativePort::open(&SerialConfig::new(name)).map_err(|e| Error::PortOpen {
                port: name.to_string(),
                reason: e.to_string(),
            })
        }
    }
}
