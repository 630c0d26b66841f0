//! Firmware update state machine and its driver.

pub mod driver;
pub mod session;
pub mod state;

pub use driver::Updater;
pub use session::{
    Failure, FrameOutcome, FrameSink, UpdateConfig, UpdateSession, UpdateSnapshot,
};
pub use state::UpdateState;
