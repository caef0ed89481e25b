#![warn(missing_docs)]
//! Participant side of a lockstep session: connection state machine, packet
//! handlers, world and region join with catch-up.

mod connect;
mod deferred;
mod session;

pub use connect::{connect_quic, run_session, QuicLink};
pub use deferred::{DeferredAction, DeferredQueue, DeferredSender};
pub use session::{Session, SessionContext, SessionFrame, SessionState, MAX_PACKETS_PER_FRAME};
