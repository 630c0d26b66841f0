//! In-memory port and connector for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::connector::Connector;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::FRAME_LEN;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Scripted outcome of one `write` call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteStep {
    /// Fail with this error kind, accepting nothing.
    Fail(io::ErrorKind),
    /// Accept at most this many bytes.
    Accept(usize),
}

/// Shared state behind a [`MockPort`].
#[derive(Default)]
pub(crate) struct Wire {
    /// Results handed out by successive reads.
    pub reads: VecDeque<io::Result<Vec<u8>>>,
    /// Every buffer written, in order.
    pub writes: Vec<Vec<u8>>,
    /// Outcomes of the next writes; unscripted writes accept everything.
    pub write_steps: VecDeque<WriteStep>,
    /// Set once `close` was called.
    pub closed: bool,
    /// Make `close` report an error (the port is still released).
    pub fail_close: bool,
    /// Simulated device: turns a written frame into a response.
    pub responder: Option<Responder>,
}

/// Port whose traffic lives in memory.
#[derive(Clone)]
pub(crate) struct MockPort {
    name: String,
    wire: Arc<Mutex<Wire>>,
}

impl MockPort {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            wire: Arc::default(),
        }
    }

    pub fn queue_read(&self, bytes: &[u8]) {
        self.wire.lock().unwrap().reads.push_back(Ok(bytes.to_vec()));
    }

    pub fn queue_read_error(&self, kind: io::ErrorKind) {
        self.wire
            .lock()
            .unwrap()
            .reads
            .push_back(Err(io::Error::from(kind)));
    }

    pub fn fail_writes(&self, kind: io::ErrorKind, count: usize) {
        let mut wire = self.wire.lock().unwrap();
        for _ in 0..count {
            wire.write_steps.push_back(WriteStep::Fail(kind));
        }
    }

    /// Let the next write take only `limit` bytes.
    pub fn accept_partial(&self, limit: usize) {
        self.wire
            .lock()
            .unwrap()
            .write_steps
            .push_back(WriteStep::Accept(limit));
    }

    /// Every byte that reached the device, in order.
    pub fn bytes_written(&self) -> Vec<u8> {
        self.wire.lock().unwrap().writes.concat()
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.wire.lock().unwrap().responder = Some(Box::new(responder));
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.wire.lock().unwrap().writes.clone()
    }

    pub fn fail_close(&self) {
        self.wire.lock().unwrap().fail_close = true;
    }

    pub fn is_closed(&self) -> bool {
        self.wire.lock().unwrap().closed
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        match wire.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    wire.reads.push_front(Ok(bytes[n..].to_vec()));
                }
                Ok(n)
            },
            Some(Err(e)) => Err(e),
            None => {
                drop(wire);
                std::thread::sleep(Duration::from_millis(1));
                Err(io::Error::from(io::ErrorKind::TimedOut))
            },
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        let accepted = match wire.write_steps.pop_front() {
            Some(WriteStep::Fail(kind)) => return Err(io::Error::from(kind)),
            Some(WriteStep::Accept(limit)) => &buf[..limit.min(buf.len())],
            None => buf,
        };
        wire.writes.push(accepted.to_vec());
        if accepted.len() == buf.len() {
            let response = wire.responder.as_mut().and_then(|respond| respond(buf));
            if let Some(response) = response {
                wire.reads.push_back(Ok(response));
            }
        }
        Ok(accepted.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn baud_rate(&self) -> u32 {
        crate::port::BAUD_RATE
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        let mut wire = self.wire.lock().unwrap();
        wire.closed = true;
        if wire.fail_close {
            return Err(Error::Io(io::Error::other("close failed")));
        }
        Ok(())
    }
}

/// Connector handing out a single [`MockPort`].
pub(crate) struct MockConnector {
    pub port: MockPort,
    pub requested: Option<String>,
    pub authorized: Vec<String>,
    pub fail_open: bool,
    pub opened: Vec<String>,
}

impl MockConnector {
    pub fn new(port: MockPort) -> Self {
        Self {
            requested: Some(port.name.clone()),
            authorized: Vec::new(),
            fail_open: false,
            opened: Vec::new(),
            port,
        }
    }
}

impl Connector for MockConnector {
    type Port = MockPort;

    fn request_port(&mut self) -> Result<Option<String>> {
        Ok(self.requested.clone())
    }

    fn authorized_ports(&mut self) -> Result<Vec<String>> {
        Ok(self.authorized.clone())
    }

    fn open(&mut self, name: &str) -> Result<MockPort> {
        if self.fail_open {
            return Err(Error::PortOpen {
                port: name.to_string(),
                reason: "busy".to_string(),
            });
        }
        self.opened.push(name.to_string());
        Ok(self.port.clone())
    }
}

/// Simulated inverter bootloader that acknowledges every known command.
pub(crate) fn inverter(frame: &[u8]) -> Option<Vec<u8>> {
    let ack: &[u8] = match (frame.first()?, frame.get(1)?) {
        (0x05, _) => &[0x03, 0x21, 0x34],
        (0x03, 0x01) => &[0x03, 0x02, 0x34],
        (0x03, 0x03) => &[0x03, 0x04, 0x34],
        (0x03, 0x05) => &[0x03, 0x06, 0x34],
        (0x03, 0x07) => &[0x03, 0x08, 0x34],
        (0x03, 0x0b) => &[0x03, 0x0c, 0x34],
        _ => return None,
    };
    let mut response = ack.to_vec();
    response.resize(FRAME_LEN, 0);
    Some(response)
}
