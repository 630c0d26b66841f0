//! Update session states.

use std::fmt;

use serde::Serialize;

use crate::protocol::AckPattern;
use crate::protocol::commands::{
    DATA_COMPLETE_ACK, DATA_WRITTEN_ACK, ERASE_ACK, RESTART_ACK, UNLOCK_ACK, VERIFY_ACK,
};

/// Protocol state of one firmware update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Idle, nothing outstanding.
    #[default]
    Ready,
    /// Unlock sent.
    AwaitingUpdateAck,
    /// Erase sent.
    AwaitingEraseAck,
    /// A data packet is in flight.
    AwaitingDataWrittenAck,
    /// Data complete sent.
    AwaitingDataCompleteAck,
    /// Verify sent.
    AwaitingVerifyAck,
    /// Restart sent.
    AwaitingRestartAck,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Error,
}

impl UpdateState {
    /// `Done` or `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether a response is outstanding in this state.
    pub fn is_awaiting(self) -> bool {
        self.expected_ack().is_some()
    }

    /// Acknowledgement that completes this state.
    pub fn expected_ack(self) -> Option<AckPattern> {
        match self {
            Self::AwaitingUpdateAck => Some(UNLOCK_ACK),
            Self::AwaitingEraseAck => Some(ERASE_ACK),
            Self::AwaitingDataWrittenAck => Some(DATA_WRITTEN_ACK),
            Self::AwaitingDataCompleteAck => Some(DATA_COMPLETE_ACK),
            Self::AwaitingVerifyAck => Some(VERIFY_ACK),
            Self::AwaitingRestartAck => Some(RESTART_ACK),
            Self::Ready | Self::Done | Self::Error => None,
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::AwaitingUpdateAck => "awaiting update ack",
            Self::AwaitingEraseAck => "awaiting erase ack",
            Self::AwaitingDataWrittenAck => "awaiting data written ack",
            Self::AwaitingDataCompleteAck => "awaiting data complete ack",
            Self::AwaitingVerifyAck => "awaiting verify ack",
            Self::AwaitingRestartAck => "awaiting restart ack",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
