//! Update session: the command/acknowledge state machine.
//!
//! The session owns all protocol state and is only mutated through
//! [`UpdateSession::start`], [`UpdateSession::on_frame`],
//! [`UpdateSession::poll_timeout`] and [`UpdateSession::on_disconnect`].
//! Commands leave through a [`FrameSink`]; time is passed in explicitly so the
//! deadline logic does not depend on a clock.
//!
//! Exactly one command is outstanding at any time. A new command is only sent
//! after the previous one resolved (matched ack, fatal code, or timeout).

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use super::state::UpdateState;
use crate::error::{Error, Result};
use crate::protocol::commands::{DATA_COMPLETE, RESTART, VERIFY};
use crate::protocol::frame::hex;
use crate::protocol::{AckPattern, FatalCode, Frame, TargetProfile, TargetType};

/// Percent reported once the device acknowledged the unlock.
const PERCENT_ERASING: u8 = 2;
/// Percent reported when the data phase starts.
const PERCENT_WRITING: u8 = 5;
/// Share of the bar covered by data packets.
const PERCENT_DATA_SPAN: usize = 92;
/// Percent reported once all data is sent.
const PERCENT_DATA_COMPLETE: u8 = 97;
/// Percent reported while verifying.
const PERCENT_VERIFYING: u8 = 98;
/// Percent reported while restarting.
const PERCENT_RESTARTING: u8 = 99;
/// Percent reported when finished.
const PERCENT_DONE: u8 = 100;

const MSG_INITIATING: &str = "Initiating firmware update...";
const MSG_ERASING: &str = "Erasing flash...";
const MSG_WRITING: &str = "Writing firmware file...";
const MSG_VERIFYING: &str = "Verifying flash...";
const MSG_RESTARTING: &str = "Restarting inverter...";
const MSG_DONE: &str = "Update complete! Please wait 15 seconds for the inverter to restart.";

/// Destination for outgoing command frames.
pub trait FrameSink {
    /// Send one frame to the device.
    fn send_frame(&mut self, frame: &Frame) -> Result<()>;
}

/// Update session tuning.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// How long to wait for each acknowledgement.
    pub response_timeout: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a session ended in [`UpdateState::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The device reported a fatal code.
    Device(FatalCode),
    /// No acknowledgement arrived before the deadline.
    Timeout,
    /// The link went away mid-update.
    Disconnected,
    /// A command could not be written.
    Transport(String),
}

impl Failure {
    /// Operator-facing status text.
    pub fn message(&self) -> String {
        match self {
            Self::Device(code) => format!("{}\nPlease retry the update process.", code.message()),
            Self::Timeout => "Inverter timed out. Please try again.".to_string(),
            Self::Disconnected => "Device Disconnected. Please try again.".to_string(),
            Self::Transport(reason) => reason.clone(),
        }
    }

    /// Equivalent library error.
    pub fn to_error(&self) -> Error {
        match self {
            Self::Device(code) => Error::Device(*code),
            Self::Timeout => Error::Timeout(self.message()),
            Self::Disconnected => Error::Disconnected,
            Self::Transport(reason) => Error::Io(io::Error::other(reason.clone())),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Result of feeding one frame to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No response was expected, or the frame was empty.
    Ignored,
    /// Neither the expected ack nor a fatal code; discarded.
    Stale,
    /// The expected ack arrived and the session moved to this state.
    Advanced(UpdateState),
    /// The device reported a fatal code.
    Fatal(FatalCode),
    /// The ack matched but the next command could not be written.
    SendFailed,
}

/// Point-in-time view of a session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSnapshot {
    /// Protocol state.
    pub state: UpdateState,
    /// Target being updated, if a session was started.
    pub target: Option<TargetType>,
    /// Progress, 0 to 100.
    pub percent: u8,
    /// Status text.
    pub message: String,
    /// Image bytes sent so far.
    pub cursor: usize,
    /// Total image length.
    pub image_len: usize,
}

/// One firmware update attempt.
#[derive(Debug, Default)]
pub struct UpdateSession {
    config: UpdateConfig,
    state: UpdateState,
    target: Option<TargetType>,
    image: Vec<u8>,
    cursor: usize,
    outstanding: Option<Frame>,
    expected: Option<AckPattern>,
    percent: u8,
    message: String,
    deadline: Option<Instant>,
    failure: Option<Failure>,
}

impl UpdateSession {
    /// Create an idle session.
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Start an update of `target` with `image`.
    ///
    /// Sends the unlock command and arms the first deadline. Fails without
    /// touching the session if `image` is empty or an update is in progress.
    pub fn start(
        &mut self,
        target: TargetType,
        image: impl Into<Vec<u8>>,
        sink: &mut dyn FrameSink,
        now: Instant,
    ) -> Result<()> {
        if self.is_active() {
            return Err(Error::InvalidState(format!(
                "an update is already running ({})",
                self.state
            )));
        }
        let image = image.into();
        if image.is_empty() {
            return Err(Error::ImageUnavailable(format!(
                "empty firmware image for {target}"
            )));
        }

        info!("Starting {target} update, {} bytes", image.len());
        *self = Self {
            config: self.config.clone(),
            target: Some(target),
            image,
            message: MSG_INITIATING.to_string(),
            ..Self::default()
        };

        let unlock = self.profile().unlock;
        self.transmit(unlock, UpdateState::AwaitingUpdateAck, sink, now)
    }

    /// Handle one frame delivered by the transport.
    pub fn on_frame(&mut self, frame: &[u8], sink: &mut dyn FrameSink, now: Instant) -> FrameOutcome {
        let Some(expected) = self.expected else {
            return FrameOutcome::Ignored;
        };
        if frame.is_empty() {
            return FrameOutcome::Ignored;
        }

        if expected.matches(frame) {
            self.cancel_timeout();
            return match self.advance(sink, now) {
                Ok(()) => FrameOutcome::Advanced(self.state),
                Err(_) => FrameOutcome::SendFailed,
            };
        }

        if let Some(code) = FatalCode::from_frame(frame) {
            warn!("Device reported fatal code 0x{:02x}: {code}", code as u8);
            self.fail(Failure::Device(code));
            return FrameOutcome::Fatal(code);
        }

        debug!("Discarding stale response {} in {}", hex(frame), self.state);
        FrameOutcome::Stale
    }

    /// Fail the session if the outstanding command's deadline has passed.
    ///
    /// Returns whether the session timed out.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline && self.expected.is_some() => {
                warn!("No response in {}", self.state);
                self.fail(Failure::Timeout);
                true
            },
            _ => false,
        }
    }

    /// Disarm the pending deadline. No-op if none is armed.
    pub fn cancel_timeout(&mut self) {
        self.deadline = None;
    }

    /// Deadline of the outstanding command.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The transport left `Open`. Fails an active session.
    ///
    /// Returns whether the session was failed.
    pub fn on_disconnect(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.fail(Failure::Disconnected);
        true
    }

    /// Whether an update is running.
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal() && self.state != UpdateState::Ready
    }

    /// Protocol state.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Target of the current or last update.
    pub fn target(&self) -> Option<TargetType> {
        self.target
    }

    /// Progress, 0 to 100.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Status text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Image bytes sent so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Acknowledgement currently awaited.
    pub fn expected(&self) -> Option<AckPattern> {
        self.expected
    }

    /// Last command written and not yet resolved.
    pub fn outstanding(&self) -> Option<&Frame> {
        self.outstanding.as_ref()
    }

    /// Why the session failed.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Current view for display.
    pub fn snapshot(&self) -> UpdateSnapshot {
        UpdateSnapshot {
            state: self.state,
            target: self.target,
            percent: self.percent,
            message: self.message.clone(),
            cursor: self.cursor,
            image_len: self.image.len(),
        }
    }

    fn profile(&self) -> &'static TargetProfile {
        self.target.unwrap_or_default().profile()
    }

    fn advance(&mut self, sink: &mut dyn FrameSink, now: Instant) -> Result<()> {
        match self.state {
            UpdateState::AwaitingUpdateAck => {
                self.set_progress(PERCENT_ERASING, MSG_ERASING);
                let erase = self.profile().erase;
                self.transmit(erase, UpdateState::AwaitingEraseAck, sink, now)
            },
            UpdateState::AwaitingEraseAck => {
                self.set_progress(PERCENT_WRITING, MSG_WRITING);
                let frame = self.next_data_write();
                self.transmit(frame, UpdateState::AwaitingDataWrittenAck, sink, now)
            },
            UpdateState::AwaitingDataWrittenAck if self.cursor < self.image.len() => {
                let frame = self.next_data_write();
                self.percent = self.percent.max(self.data_percent());
                self.transmit(frame, UpdateState::AwaitingDataWrittenAck, sink, now)
            },
            UpdateState::AwaitingDataWrittenAck => {
                self.set_progress(PERCENT_DATA_COMPLETE, MSG_WRITING);
                self.transmit(DATA_COMPLETE, UpdateState::AwaitingDataCompleteAck, sink, now)
            },
            UpdateState::AwaitingDataCompleteAck => {
                self.set_progress(PERCENT_VERIFYING, MSG_VERIFYING);
                self.transmit(VERIFY, UpdateState::AwaitingVerifyAck, sink, now)
            },
            UpdateState::AwaitingVerifyAck => {
                self.set_progress(PERCENT_RESTARTING, MSG_RESTARTING);
                self.transmit(RESTART, UpdateState::AwaitingRestartAck, sink, now)
            },
            UpdateState::AwaitingRestartAck => {
                self.set_progress(PERCENT_DONE, MSG_DONE);
                self.state = UpdateState::Done;
                self.expected = None;
                self.outstanding = None;
                info!("Update complete");
                Ok(())
            },
            UpdateState::Ready | UpdateState::Done | UpdateState::Error => Ok(()),
        }
    }

    fn next_data_write(&mut self) -> Frame {
        let write = self.profile().data_write(&self.image, self.cursor);
        debug!(
            "Data packet at 0x{:08x}, {} bytes from offset {}",
            write.address, write.copied, self.cursor
        );
        self.cursor += write.copied;
        write.frame
    }

    /// `5 + round(92 * cursor / len)`, rounding halves up.
    fn data_percent(&self) -> u8 {
        let len = self.image.len().max(1);
        let cursor = self.cursor.min(len);
        let scaled = (2 * PERCENT_DATA_SPAN * cursor + len) / (2 * len);
        PERCENT_WRITING + u8::try_from(scaled).unwrap_or(u8::MAX - PERCENT_WRITING)
    }

    fn set_progress(&mut self, percent: u8, message: &str) {
        self.percent = self.percent.max(percent);
        if self.message != message {
            info!("{message}");
            self.message = message.to_string();
        }
    }

    fn transmit(
        &mut self,
        frame: Frame,
        next: UpdateState,
        sink: &mut dyn FrameSink,
        now: Instant,
    ) -> Result<()> {
        debug!("{} -> {next}", self.state);
        self.state = next;
        self.expected = next.expected_ack();
        self.outstanding = Some(frame);

        match sink.send_frame(&frame) {
            Ok(()) => {
                self.deadline = Some(now + self.config.response_timeout);
                Ok(())
            },
            Err(e) => {
                warn!("Failed to send command in {next}: {e}");
                let failure = if e.is_disconnect() {
                    Failure::Disconnected
                } else {
                    Failure::Transport(e.to_string())
                };
                self.fail(failure);
                Err(e)
            },
        }
    }

    fn fail(&mut self, failure: Failure) {
        self.deadline = None;
        self.expected = None;
        self.outstanding = None;
        self.state = UpdateState::Error;
        self.message = failure.message();
        self.failure = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{
        ARM_PROFILE, DATA_COMPLETE_ACK, DATA_WRITTEN_ACK, DSP_PROFILE, ERASE_ACK, ERASE_ARM,
        RESTART_ACK, UNLOCK_ACK, UNLOCK_ARM, UNLOCK_DSP, VERIFY_ACK,
    };
    use crate::protocol::{CHUNK_LEN, FRAME_LEN, packet_count};

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Frame>,
        fail_next: bool,
        unplugged: bool,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&mut self, frame: &Frame) -> Result<()> {
            if self.unplugged {
                return Err(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            if self.fail_next {
                self.fail_next = false;
                return Err(Error::WriteHandle {
                    attempts: 3,
                    reason: "busy".into(),
                });
            }
            self.frames.push(*frame);
            Ok(())
        }
    }

    fn ack(pattern: AckPattern) -> Vec<u8> {
        let mut frame = pattern.bytes().to_vec();
        frame.resize(FRAME_LEN, 0);
        frame
    }

    /// Acknowledge everything until the session stops expecting a response.
    fn run_to_end(session: &mut UpdateSession, sink: &mut RecordingSink, now: Instant) -> Vec<u8> {
        let mut percents = vec![session.percent()];
        while let Some(expected) = session.expected() {
            let outcome = session.on_frame(&ack(expected), sink, now);
            assert!(matches!(outcome, FrameOutcome::Advanced(_)));
            percents.push(session.percent());
        }
        percents
    }

    fn data_frames(sink: &RecordingSink) -> Vec<&Frame> {
        sink.frames
            .iter()
            .filter(|f| f.opcode() == 0x03 && f.sub_opcode() == 0x03)
            .collect()
    }

    #[test]
    fn test_arm_100_byte_update() {
        let image: Vec<u8> = (1..=100u8).collect();
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();

        session.start(TargetType::Arm, image.clone(), &mut sink, now).unwrap();
        assert_eq!(session.state(), UpdateState::AwaitingUpdateAck);
        assert_eq!(sink.frames, vec![UNLOCK_ARM]);
        assert_eq!(session.message(), "Initiating firmware update...");
        assert!(session.next_deadline().is_some());

        let outcome = session.on_frame(&[0x03, 0x21, 0x34], &mut sink, now);
        assert_eq!(outcome, FrameOutcome::Advanced(UpdateState::AwaitingEraseAck));
        assert_eq!(sink.frames.last(), Some(&ERASE_ARM));
        assert_eq!(session.percent(), 2);

        session.on_frame(&[0x03, 0x02, 0x34], &mut sink, now);
        assert_eq!(session.state(), UpdateState::AwaitingDataWrittenAck);
        assert_eq!(session.percent(), 5);
        assert_eq!(session.cursor(), 48);
        let first = sink.frames.last().unwrap().as_bytes();
        assert_eq!(&first[8..56], &image[..48]);

        session.on_frame(&ack(DATA_WRITTEN_ACK), &mut sink, now);
        assert_eq!(session.cursor(), 96);
        assert_eq!(session.percent(), 93);

        session.on_frame(&ack(DATA_WRITTEN_ACK), &mut sink, now);
        assert_eq!(session.cursor(), 100);
        assert_eq!(session.percent(), 97);
        let tail = sink.frames.last().unwrap().as_bytes();
        assert_eq!(&tail[8..12], &image[96..]);
        assert!(tail[12..].iter().all(|&b| b == 0));

        session.on_frame(&ack(DATA_WRITTEN_ACK), &mut sink, now);
        assert_eq!(session.state(), UpdateState::AwaitingDataCompleteAck);
        assert_eq!(sink.frames.last(), Some(&DATA_COMPLETE));
        assert_eq!(session.percent(), 97);

        session.on_frame(&ack(DATA_COMPLETE_ACK), &mut sink, now);
        assert_eq!(sink.frames.last(), Some(&VERIFY));
        assert_eq!(session.percent(), 98);

        session.on_frame(&ack(VERIFY_ACK), &mut sink, now);
        assert_eq!(sink.frames.last(), Some(&RESTART));
        assert_eq!(session.percent(), 99);

        let outcome = session.on_frame(&ack(RESTART_ACK), &mut sink, now);
        assert_eq!(outcome, FrameOutcome::Advanced(UpdateState::Done));
        assert_eq!(session.percent(), 100);
        assert_eq!(session.next_deadline(), None);
        assert!(session.message().starts_with("Update complete!"));

        assert_eq!(data_frames(&sink).len(), 3);
        // unlock, erase, 3 data, complete, verify, restart
        assert_eq!(sink.frames.len(), 8);
    }

    #[test]
    fn test_packet_count_and_zero_tail() {
        for len in [1, 47, 48, 49, 95, 96, 97, 1000] {
            let image = vec![0xC3; len];
            let mut sink = RecordingSink::default();
            let mut session = UpdateSession::default();
            let now = Instant::now();
            session.start(TargetType::Arm, image, &mut sink, now).unwrap();
            run_to_end(&mut session, &mut sink, now);

            let data = data_frames(&sink);
            assert_eq!(data.len(), packet_count(len), "len {len}");
            let tail_len = len - (data.len() - 1) * CHUNK_LEN;
            let tail = data.last().unwrap().as_bytes();
            assert!(tail[8 + tail_len..].iter().all(|&b| b == 0), "len {len}");
        }
    }

    #[test]
    fn test_dsp_addresses_use_length_tag_stride() {
        let image = vec![0x5A; 48 * 4];
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Dsp, image, &mut sink, now).unwrap();
        assert_eq!(sink.frames[0], UNLOCK_DSP);
        run_to_end(&mut session, &mut sink, now);

        assert_eq!(sink.frames[1], DSP_PROFILE.erase);
        for (n, frame) in data_frames(&sink).iter().enumerate() {
            let bytes = frame.as_bytes();
            let address = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            assert_eq!(address, DSP_PROFILE.start_address + n as u32 * 0x18);
            assert_eq!(&bytes[2..4], &[0x18, 0x00]);
            assert_eq!(&bytes[8..56], &[0x5A; 48]);
        }
    }

    #[test]
    fn test_arm_addresses() {
        let image = vec![0x00; 48 * 3];
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, image, &mut sink, now).unwrap();
        run_to_end(&mut session, &mut sink, now);

        for (n, frame) in data_frames(&sink).iter().enumerate() {
            let bytes = frame.as_bytes();
            let address = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            assert_eq!(address, ARM_PROFILE.start_address + n as u32 * 0x30);
        }
    }

    #[test]
    fn test_percent_monotonic_and_100_only_when_done() {
        let image = vec![0xFF; 4801];
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, image, &mut sink, now).unwrap();

        let percents = run_to_end(&mut session, &mut sink, now);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(percents.iter().filter(|&&p| p == 100).count(), 1);
        assert_eq!(session.state(), UpdateState::Done);
    }

    #[test]
    fn test_trailing_bytes_advance_exactly_one_step() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, vec![1; 10], &mut sink, now).unwrap();

        let mut frame = UNLOCK_ACK.bytes().to_vec();
        frame.extend_from_slice(&ERASE_ACK.bytes()[..]);
        let outcome = session.on_frame(&frame, &mut sink, now);
        assert_eq!(outcome, FrameOutcome::Advanced(UpdateState::AwaitingEraseAck));
        assert_eq!(sink.frames.len(), 2);
    }

    #[test]
    fn test_stale_frame_leaves_session_unchanged() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, vec![1; 200], &mut sink, now).unwrap();
        session.on_frame(&ack(UNLOCK_ACK), &mut sink, now);
        session.on_frame(&ack(ERASE_ACK), &mut sink, now);

        let before = session.snapshot();
        let expected = session.expected();
        let sent = sink.frames.len();

        // Device repeats its previous ack until it processes the next command
        assert_eq!(session.on_frame(&ack(ERASE_ACK), &mut sink, now), FrameOutcome::Stale);
        // Too short to match
        assert_eq!(session.on_frame(&[0x03, 0x04], &mut sink, now), FrameOutcome::Stale);
        assert_eq!(session.on_frame(&[], &mut sink, now), FrameOutcome::Ignored);

        assert_eq!(session.snapshot(), before);
        assert_eq!(session.expected(), expected);
        assert_eq!(sink.frames.len(), sent);
    }

    #[test]
    fn test_fatal_code_during_erase_then_late_ack_ignored() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, now).unwrap();
        session.on_frame(&ack(UNLOCK_ACK), &mut sink, now);
        assert_eq!(session.state(), UpdateState::AwaitingEraseAck);

        let outcome = session.on_frame(&[0x03, 0xfd, 0x34], &mut sink, now);
        assert_eq!(outcome, FrameOutcome::Fatal(FatalCode::EraseFailure));
        assert_eq!(session.state(), UpdateState::Error);
        assert_eq!(
            session.message(),
            "Flash erase failure.\nPlease retry the update process."
        );
        assert_eq!(session.expected(), None);
        assert_eq!(session.next_deadline(), None);

        let sent = sink.frames.len();
        assert_eq!(session.on_frame(&ack(ERASE_ACK), &mut sink, now), FrameOutcome::Ignored);
        assert_eq!(session.state(), UpdateState::Error);
        assert_eq!(sink.frames.len(), sent);
        assert!(matches!(
            session.failure().map(Failure::to_error),
            Some(Error::Device(FatalCode::EraseFailure))
        ));
    }

    #[test]
    fn test_timeout_fails_session() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::new(UpdateConfig {
            response_timeout: Duration::from_secs(10),
        });
        let t0 = Instant::now();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, t0).unwrap();

        assert!(!session.poll_timeout(t0 + Duration::from_secs(9)));
        assert_eq!(session.state(), UpdateState::AwaitingUpdateAck);

        assert!(session.poll_timeout(t0 + Duration::from_secs(10)));
        assert_eq!(session.state(), UpdateState::Error);
        assert_eq!(session.message(), "Inverter timed out. Please try again.");
        assert_eq!(session.failure(), Some(&Failure::Timeout));

        // Fired timer and late ack are both no-ops
        assert!(!session.poll_timeout(t0 + Duration::from_secs(30)));
        assert_eq!(
            session.on_frame(&ack(UNLOCK_ACK), &mut sink, t0),
            FrameOutcome::Ignored
        );
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_matched_ack_rearms_deadline() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let t0 = Instant::now();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, t0).unwrap();

        let t1 = t0 + Duration::from_secs(8);
        session.on_frame(&ack(UNLOCK_ACK), &mut sink, t1);
        assert_eq!(session.next_deadline(), Some(t1 + Duration::from_secs(10)));
        assert!(!session.poll_timeout(t0 + Duration::from_secs(12)));
    }

    #[test]
    fn test_cancel_timeout_is_idempotent() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let t0 = Instant::now();
        session.cancel_timeout();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, t0).unwrap();

        session.cancel_timeout();
        session.cancel_timeout();
        assert_eq!(session.next_deadline(), None);
        assert!(!session.poll_timeout(t0 + Duration::from_secs(60)));
        assert_eq!(session.state(), UpdateState::AwaitingUpdateAck);
    }

    #[test]
    fn test_disconnect_fails_active_session_only() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();

        assert!(!session.on_disconnect());
        assert_eq!(session.state(), UpdateState::Ready);

        session.start(TargetType::Dsp, vec![1; 100], &mut sink, now).unwrap();
        session.on_frame(&ack(UNLOCK_ACK), &mut sink, now);
        assert!(session.on_disconnect());
        assert_eq!(session.state(), UpdateState::Error);
        assert_eq!(session.message(), "Device Disconnected. Please try again.");
        assert_eq!(session.next_deadline(), None);
        assert_eq!(session.expected(), None);

        // Already terminal
        assert!(!session.on_disconnect());
        assert_eq!(session.failure(), Some(&Failure::Disconnected));
    }

    #[test]
    fn test_empty_image_rejected_and_stays_ready() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let err = session
            .start(TargetType::Arm, Vec::new(), &mut sink, Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::ImageUnavailable(_)));
        assert_eq!(session.state(), UpdateState::Ready);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_start_while_active_rejected() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, now).unwrap();

        let err = session
            .start(TargetType::Dsp, vec![2; 100], &mut sink, now)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(session.target(), Some(TargetType::Arm));
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_restart_after_terminal_resets_everything() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();

        session.start(TargetType::Arm, vec![1; 100], &mut sink, now).unwrap();
        run_to_end(&mut session, &mut sink, now);
        assert_eq!(session.state(), UpdateState::Done);

        session.start(TargetType::Dsp, vec![2; 30], &mut sink, now).unwrap();
        assert_eq!(session.state(), UpdateState::AwaitingUpdateAck);
        assert_eq!(session.cursor(), 0);
        assert_eq!(session.percent(), 0);
        assert_eq!(session.expected(), Some(UNLOCK_ACK));
        assert_eq!(session.failure(), None);
        assert_eq!(sink.frames.last(), Some(&UNLOCK_DSP));

        // And after an error
        session.poll_timeout(now + Duration::from_secs(60));
        assert_eq!(session.state(), UpdateState::Error);
        session.start(TargetType::Arm, vec![3; 30], &mut sink, now).unwrap();
        assert_eq!(session.snapshot().image_len, 30);
        assert_eq!(session.outstanding(), Some(&UNLOCK_ARM));
        assert_eq!(session.message(), "Initiating firmware update...");
    }

    #[test]
    fn test_send_failure_moves_to_error() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, now).unwrap();

        sink.fail_next = true;
        let outcome = session.on_frame(&ack(UNLOCK_ACK), &mut sink, now);
        assert_eq!(outcome, FrameOutcome::SendFailed);
        assert_eq!(session.state(), UpdateState::Error);
        assert!(session.message().contains("write handle"));
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn test_unlock_send_failure_reported_by_start() {
        let mut sink = RecordingSink {
            fail_next: true,
            ..RecordingSink::default()
        };
        let mut session = UpdateSession::default();
        let result = session.start(TargetType::Arm, vec![1; 10], &mut sink, Instant::now());
        assert!(matches!(result, Err(Error::WriteHandle { .. })));
        assert_eq!(session.state(), UpdateState::Error);
    }

    #[test]
    fn test_unplugged_during_send_is_disconnect() {
        let mut sink = RecordingSink::default();
        let mut session = UpdateSession::default();
        let now = Instant::now();
        session.start(TargetType::Arm, vec![1; 100], &mut sink, now).unwrap();

        sink.unplugged = true;
        let outcome = session.on_frame(&ack(UNLOCK_ACK), &mut sink, now);
        assert_eq!(outcome, FrameOutcome::SendFailed);
        assert_eq!(session.state(), UpdateState::Error);
        assert_eq!(session.failure(), Some(&Failure::Disconnected));
        assert_eq!(session.message(), "Device Disconnected. Please try again.");
        assert!(matches!(
            session.failure().map(Failure::to_error),
            Some(Error::Disconnected)
        ));
    }
}
