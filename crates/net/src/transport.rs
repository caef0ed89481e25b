//! The connection seen by the session: send a packet, poll for received ones.
//!
//! [`LoopbackTransport`] connects two sessions in one process; the QUIC
//! transport lives in [`crate::quic`].

use crate::codec::encode_packet;
use crate::protocol::{Packet, PacketTag};
use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use tracing::debug;

/// A received packet: tag plus raw payload.
pub type Received = (PacketTag, Vec<u8>);

/// Bidirectional packet connection.
pub trait Transport: Send {
    /// Queue a packet for sending.
    fn send(&mut self, tag: PacketTag, payload: &[u8]) -> Result<()>;

    /// Next received packet, if one is waiting.
    ///
    /// Errors once the peer has gone away and nothing is left to read.
    fn try_recv(&mut self) -> Result<Option<Received>>;

    /// Close the connection.
    fn close(&mut self, reason: &str);

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// Serialize and send a typed packet.
pub fn send_packet<P: Packet, T: Transport + ?Sized>(transport: &mut T, packet: &P) -> Result<()> {
    let payload = encode_packet(packet)?;
    transport.send(P::TAG, &payload)
}

/// In-process transport over channels.
pub struct LoopbackTransport {
    outgoing: Option<Sender<Received>>,
    incoming: Receiver<Received>,
    name: &'static str,
}

impl LoopbackTransport {
    /// Two connected ends: `(client, server)`.
    pub fn pair() -> (Self, Self) {
        let (to_server, server_rx) = mpsc::channel();
        let (to_client, client_rx) = mpsc::channel();
        (
            Self {
                outgoing: Some(to_server),
                incoming: client_rx,
                name: "client",
            },
            Self {
                outgoing: Some(to_client),
                incoming: server_rx,
                name: "server",
            },
        )
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, tag: PacketTag, payload: &[u8]) -> Result<()> {
        let sender = self
            .outgoing
            .as_ref()
            .ok_or_else(|| anyhow!("{} loopback is closed", self.name))?;
        sender
            .send((tag, payload.to_vec()))
            .map_err(|_| anyhow!("{} loopback peer dropped", self.name))
    }

    fn try_recv(&mut self) -> Result<Option<Received>> {
        match self.incoming.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("{} loopback peer dropped", self.name)),
        }
    }

    fn close(&mut self, reason: &str) {
        if self.outgoing.take().is_some() {
            debug!(end = self.name, reason, "Closing loopback");
        }
    }

    fn is_open(&self) -> bool {
        self.outgoing.is_some()
    }
}
