//! Port session: lifecycle of the physical link and packet I/O.
//!
//! ## States
//!
//! ```text
//! Closed --> Opening --> Open --> Closing --> Closed
//!                         |                     ^
//!                         +---- disconnect -----+   (unexpected, skips Closing)
//! ```
//!
//! The session is driven cooperatively: [`PortSession::read_once`] is one
//! iteration of the read loop and must be called repeatedly while the port is
//! open. Everything else runs to completion between those calls, so a new
//! read iteration can never start before the previous one has finished.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use serde::Serialize;

use super::connector::Connector;
use super::framer::Framer;
use super::subscribers::{Subscribers, Subscription};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{FRAME_LEN, Frame, frame::hex};

/// Connection state of the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// No port held.
    #[default]
    Closed,
    /// A device is being selected or opened.
    Opening,
    /// Port open, read loop active.
    Open,
    /// Port being released.
    Closing,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Opening => write!(f, "opening"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Port session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait before auto-connecting; reopening right after a disconnect fails on some adapters.
    pub settle_delay: Duration,
    /// Attempts to acquire the write handle.
    pub write_attempts: usize,
    /// Delay between write attempts.
    pub write_retry_delay: Duration,
    /// Size of the receive buffer used for each read.
    pub rx_buffer_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            write_attempts: 3,
            write_retry_delay: Duration::from_millis(10),
            rx_buffer_len: FRAME_LEN,
        }
    }
}

/// Outcome of one read loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// Nothing complete arrived.
    Idle,
    /// A frame was dispatched to subscribers.
    Frame,
    /// The port is not open (closed by the device, failed, or never opened).
    Closed,
}

/// Owner of the serial link.
pub struct PortSession<C: Connector> {
    connector: C,
    config: SessionConfig,
    port: Option<C::Port>,
    state: PortState,
    framer: Framer,
    subscribers: Subscribers,
    has_tried_autoconnect: bool,
    has_manually_disconnected: bool,
}

impl<C: Connector> PortSession<C> {
    /// Create a closed session with default tuning.
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, SessionConfig::default())
    }

    /// Create a closed session.
    pub fn with_config(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            port: None,
            state: PortState::Closed,
            framer: Framer::new(),
            subscribers: Subscribers::new(),
            has_tried_autoconnect: false,
            has_manually_disconnected: false,
        }
    }

    /// Current link state.
    pub fn state(&self) -> PortState {
        self.state
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }

    /// Whether auto-connect has already run during this closed period.
    pub fn has_tried_autoconnect(&self) -> bool {
        self.has_tried_autoconnect
    }

    /// Whether the operator disconnected explicitly.
    pub fn has_manually_disconnected(&self) -> bool {
        self.has_manually_disconnected
    }

    /// Name of the open port.
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_ref().map(Port::name)
    }

    /// The connector used to find and open ports.
    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// Ask for a device and open it.
    ///
    /// Returns `Ok(false)` without doing anything unless the link is closed.
    /// On failure the session is back in `Closed` and the reason is returned.
    pub fn connect(&mut self) -> Result<bool> {
        if self.state != PortState::Closed {
            debug!("connect ignored, port is {}", self.state);
            return Ok(false);
        }

        self.state = PortState::Opening;
        let result = self
            .connector
            .request_port()
            .and_then(|selected| selected.ok_or(Error::NoDeviceSelected))
            .and_then(|name| self.open_port(&name));

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Connect failed: {e}");
                self.state = PortState::Closed;
                Err(e)
            },
        }
    }

    /// Reopen a previously authorised device without prompting.
    ///
    /// Runs at most once per closed period, and never after a manual
    /// disconnect until the next successful connect.
    pub fn auto_connect(&mut self) -> Result<bool> {
        if self.state != PortState::Closed
            || self.has_manually_disconnected
            || self.has_tried_autoconnect
        {
            return Ok(false);
        }

        self.state = PortState::Opening;
        thread::sleep(self.config.settle_delay);

        let result = self.connector.authorized_ports().and_then(|ports| {
            match ports.into_iter().next() {
                Some(name) => self.open_port(&name).map(|()| true),
                None => Ok(false),
            }
        });
        self.has_tried_autoconnect = true;

        match result {
            Ok(true) => Ok(true),
            Ok(false) => {
                debug!("No authorised device to auto-connect to");
                self.state = PortState::Closed;
                Ok(false)
            },
            Err(e) => {
                debug!("Auto-connect failed: {e}");
                self.state = PortState::Closed;
                Err(e)
            },
        }
    }

    fn open_port(&mut self, name: &str) -> Result<()> {
        let mut port = self.connector.open(name)?;
        if let Err(e) = port.clear_buffers() {
            debug!("Could not clear buffers on {name}: {e}");
        }
        info!("Opened {name} at {} baud", port.baud_rate());

        self.port = Some(port);
        self.framer.reset();
        self.state = PortState::Open;
        self.has_manually_disconnected = false;
        Ok(())
    }

    /// Close the link at the operator's request.
    ///
    /// Any partially received frame is dropped. Auto-connect stays disabled
    /// until the next successful [`connect`](Self::connect).
    pub fn disconnect(&mut self) {
        if self.state != PortState::Open {
            return;
        }

        self.state = PortState::Closing;
        self.framer.reset();
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                warn!("Error closing {}: {e}", port.name());
            }
            info!("Closed {}", port.name());
        }

        self.has_manually_disconnected = true;
        self.has_tried_autoconnect = false;
        self.state = PortState::Closed;
    }

    /// Handle the device vanishing underneath an open port.
    pub fn notify_disconnect(&mut self) {
        if self.port.is_none() && self.state == PortState::Closed {
            return;
        }

        warn!("Device disconnected");
        self.framer.reset();
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                debug!("Error closing {}: {e}", port.name());
            }
        }
        self.has_tried_autoconnect = false;
        self.state = PortState::Closed;
    }

    /// Write a whole buffer to the device.
    ///
    /// Only one writer may use the session at a time; concurrent writes are
    /// not queued. Acquiring the write handle is retried while nothing has
    /// been written yet. Once part of the buffer is out, any failure is
    /// returned as is.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state != PortState::Open {
            return Err(Error::PortClosed);
        }
        trace!("TX {}", hex(bytes));

        let result = self.write_buffer(bytes);
        if let Err(e) = &result {
            if e.is_disconnect() {
                self.notify_disconnect();
            }
        }
        result
    }

    fn write_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        let attempts = self.config.write_attempts.max(1);
        let retry_delay = self.config.write_retry_delay;
        let port = self.port.as_mut().ok_or(Error::PortClosed)?;

        let mut attempt = 1;
        let mut offset = 0;
        while offset < bytes.len() {
            match port.write(&bytes[offset..]) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        ErrorKind::WriteZero,
                        format!("device accepted {offset} of {} bytes", bytes.len()),
                    )));
                },
                Ok(n) => offset += n,
                Err(e) if offset == 0 && is_transient(&e) => {
                    warn!("Write handle unavailable (attempt {attempt}/{attempts}): {e}");
                    if attempt == attempts {
                        return Err(Error::WriteHandle {
                            attempts,
                            reason: e.to_string(),
                        });
                    }
                    attempt += 1;
                    thread::sleep(retry_delay);
                },
                Err(e) if offset > 0 => {
                    return Err(Error::Io(io::Error::new(
                        e.kind(),
                        format!("write failed after {offset} of {} bytes: {e}", bytes.len()),
                    )));
                },
                Err(e) => return Err(e.into()),
            }
        }

        port.flush()?;
        Ok(())
    }

    /// Register `callback` for every complete frame read from now on.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Run one iteration of the read loop.
    ///
    /// A read reporting end of stream or a hard error closes the session; the
    /// caller observes this as [`ReadEvent::Closed`] and through [`state`](Self::state).
    pub fn read_once(&mut self) -> ReadEvent {
        if self.state != PortState::Open {
            return ReadEvent::Closed;
        }
        let Some(port) = self.port.as_mut() else {
            return ReadEvent::Closed;
        };

        let mut buf = vec![0u8; self.config.rx_buffer_len.max(1)];
        match port.read(&mut buf) {
            Ok(0) => {
                info!("Device closed the stream");
                self.notify_disconnect();
                ReadEvent::Closed
            },
            Ok(n) => {
                trace!("RX {}", hex(&buf[..n]));
                match self.framer.push(&buf[..n]) {
                    Some(frame) => {
                        self.subscribers.dispatch(&frame);
                        ReadEvent::Frame
                    },
                    None => ReadEvent::Idle,
                }
            },
            Err(e) if is_transient(&e) => ReadEvent::Idle,
            Err(e) => {
                error!("Read failed: {e}");
                self.notify_disconnect();
                ReadEvent::Closed
            },
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

impl<C: Connector> crate::update::FrameSink for PortSession<C> {
    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write(frame.as_bytes())
    }
}
