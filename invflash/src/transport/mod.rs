//! Serial transport: port lifecycle, framing and frame fan-out.

pub mod connector;
pub mod framer;
pub mod session;
pub mod subscribers;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "native")]
pub use connector::{NativeConnector, PortSelector};
pub use connector::Connector;
pub use framer::Framer;
pub use session::{PortSession, PortState, ReadEvent, SessionConfig};
pub use subscribers::{Subscribers, Subscription, SubscriptionId};
