//! Cooperative driver tying a [`PortSession`] to an [`UpdateSession`].
//!
//! Each [`Updater::step`] runs one read iteration, feeds any received frames
//! to the session, checks the response deadline and reports a transport that
//! left `Open` to the session. Frames reach the driver through a subscription
//! that pushes into a channel, so the transport never touches session state.

use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

use log::{debug, info};

use super::session::{UpdateConfig, UpdateSession, UpdateSnapshot};
use crate::error::{Error, Result};
use crate::protocol::TargetType;
use crate::transport::{Connector, PortSession, ReadEvent, Subscription};

/// Runs firmware updates over a port session.
pub struct Updater<C: Connector> {
    port: PortSession<C>,
    session: UpdateSession,
    inbox: Option<Receiver<Vec<u8>>>,
    subscription: Option<Subscription>,
}

impl<C: Connector> Updater<C> {
    /// Create a driver around `port`.
    pub fn new(port: PortSession<C>, config: UpdateConfig) -> Self {
        Self {
            port,
            session: UpdateSession::new(config),
            inbox: None,
            subscription: None,
        }
    }

    /// The underlying port session.
    pub fn port(&self) -> &PortSession<C> {
        &self.port
    }

    /// The underlying port session, for connect and disconnect.
    pub fn port_mut(&mut self) -> &mut PortSession<C> {
        &mut self.port
    }

    /// The update session.
    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    /// Subscribe to the port and send the first command.
    pub fn start(&mut self, target: TargetType, image: impl Into<Vec<u8>>) -> Result<()> {
        if !self.port.is_open() {
            return Err(Error::PortClosed);
        }

        let (tx, rx) = mpsc::channel();
        let subscription = self.port.subscribe(move |frame| {
            // Receiver gone means the update already finished
            let _ = tx.send(frame.to_vec());
        });

        match self
            .session
            .start(target, image, &mut self.port, Instant::now())
        {
            Ok(()) => {
                self.detach();
                self.inbox = Some(rx);
                self.subscription = Some(subscription);
                Ok(())
            },
            Err(e) => {
                subscription.unsubscribe();
                Err(e)
            },
        }
    }

    /// Run one iteration: read, dispatch, deadline, link state.
    pub fn step(&mut self) -> ReadEvent {
        let event = self.port.read_once();

        if let Some(inbox) = &self.inbox {
            while let Ok(frame) = inbox.try_recv() {
                let outcome = self
                    .session
                    .on_frame(&frame, &mut self.port, Instant::now());
                debug!("Frame handled: {outcome:?}");
            }
        }

        self.session.poll_timeout(Instant::now());
        if !self.port.is_open() && self.session.on_disconnect() {
            info!("Update aborted, port {}", self.port.state());
        }
        if self.session.state().is_terminal() {
            self.detach();
        }
        event
    }

    /// Start an update and drive it to completion.
    ///
    /// `progress` sees every distinct snapshot. When `cancel` returns true the
    /// port is disconnected, which fails the update.
    pub fn run<P, X>(
        &mut self,
        target: TargetType,
        image: impl Into<Vec<u8>>,
        mut progress: P,
        cancel: X,
    ) -> Result<UpdateSnapshot>
    where
        P: FnMut(&UpdateSnapshot),
        X: Fn() -> bool,
    {
        self.start(target, image)?;
        let mut last = self.session.snapshot();
        progress(&last);

        while !self.session.state().is_terminal() {
            if cancel() && self.port.is_open() {
                info!("Update cancelled, disconnecting");
                self.port.disconnect();
            }
            self.step();

            let snapshot = self.session.snapshot();
            if snapshot != last {
                progress(&snapshot);
                last = snapshot;
            }
        }

        match self.session.failure() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(last),
        }
    }

    fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.inbox = None;
    }
}
