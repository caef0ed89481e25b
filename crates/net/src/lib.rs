#![warn(missing_docs)]
//! Wire protocol and transports between participants and the authority.

pub mod codec;
pub mod protocol;
pub mod quic;
mod router;
mod transport;

pub use codec::{decode_frame, decode_packet, encode_frame, encode_packet, frame_packet};
pub use protocol::*;
pub use quic::{ClientEndpoint, QuicTransport, ServerEndpoint};
pub use router::PacketRouter;
pub use transport::{send_packet, LoopbackTransport, Received, Transport};
