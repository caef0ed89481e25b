//! Dispatch of received packets to per-tag handlers.

use crate::codec::decode_packet;
use crate::protocol::{Packet, PacketTag};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{trace, warn};

type Handler<C> = Box<dyn FnMut(&mut C, &[u8]) -> Result<()> + Send>;

/// Routes raw packet payloads to handlers over a shared context `C`.
pub struct PacketRouter<C> {
    handlers: HashMap<PacketTag, Handler<C>>,
}

impl<C> Default for PacketRouter<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> PacketRouter<C> {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that receives the raw payload for `tag`.
    ///
    /// Replaces any handler already registered for the tag.
    pub fn register_raw<F>(&mut self, tag: PacketTag, handler: F)
    where
        F: FnMut(&mut C, &[u8]) -> Result<()> + Send + 'static,
    {
        self.handlers.insert(tag, Box::new(handler));
    }

    /// Register a handler for a typed packet.
    pub fn on<P, F>(&mut self, mut handler: F)
    where
        P: Packet,
        F: FnMut(&mut C, P) -> Result<()> + Send + 'static,
    {
        self.register_raw(P::TAG, move |context, payload| {
            let packet = decode_packet::<P>(payload)?;
            handler(context, packet)
        });
    }

    /// Whether a handler exists for `tag`.
    pub fn handles(&self, tag: PacketTag) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Run the handler for `tag`.
    ///
    /// Returns `Ok(false)` when no handler is registered.
    pub fn dispatch(&mut self, context: &mut C, tag: PacketTag, payload: &[u8]) -> Result<bool> {
        let Some(handler) = self.handlers.get_mut(&tag) else {
            warn!(%tag, len = payload.len(), "No handler for packet");
            return Ok(false);
        };
        trace!(%tag, len = payload.len(), "Dispatching packet");
        handler(context, payload).with_context(|| format!("Handling {}", tag))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_packet;
    use crate::protocol::{Notification, TimeControl};

    #[derive(Default)]
    struct Seen {
        horizon: i32,
        notes: Vec<String>,
    }

    fn router() -> PacketRouter<Seen> {
        let mut router = PacketRouter::<Seen>::new();
        router.on::<TimeControl, _>(|seen, packet| {
            seen.horizon = packet.tick_until;
            Ok(())
        });
        router.on::<Notification, _>(|seen, packet| {
            seen.notes.push(packet.text);
            Ok(())
        });
        router
    }

    #[test]
    fn typed_handlers_receive_decoded_packets() {
        let mut router = router();
        let mut seen = Seen::default();
        let payload = encode_packet(&TimeControl { tick_until: 77 }).unwrap();
        assert!(router
            .dispatch(&mut seen, PacketTag::TimeControl, &payload)
            .unwrap());
        let payload = encode_packet(&Notification {
            text: "raid incoming".into(),
        })
        .unwrap();
        router
            .dispatch(&mut seen, PacketTag::Notification, &payload)
            .unwrap();

        assert_eq!(seen.horizon, 77);
        assert_eq!(seen.notes, vec!["raid incoming".to_string()]);
    }

    #[test]
    fn unhandled_tags_are_reported_not_fatal() {
        let mut router = router();
        let mut seen = Seen::default();
        assert!(!router.handles(PacketTag::PlayerList));
        assert!(!router
            .dispatch(&mut seen, PacketTag::PlayerList, &[])
            .unwrap());
    }

    #[test]
    fn malformed_payloads_surface_as_errors() {
        let mut router = router();
        let mut seen = Seen::default();
        assert!(router
            .dispatch(&mut seen, PacketTag::TimeControl, &[])
            .is_err());
        assert_eq!(seen.horizon, 0);
    }
}
