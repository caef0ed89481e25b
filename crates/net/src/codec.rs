//! Packet encoding and decoding with framing.
//!
//! Frame format: `[length: u32][tag: u8][payload: bytes]`, where `length`
//! counts the tag and payload but not itself.

use crate::protocol::{Packet, PacketTag};
use anyhow::{Context, Result};

/// Bytes taken by the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Largest accepted frame body (tag plus payload).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Serialize a packet body with postcard.
pub fn encode_packet<P: Packet>(packet: &P) -> Result<Vec<u8>> {
    postcard::to_allocvec(packet).with_context(|| format!("Failed to serialize {}", P::TAG))
}

/// Deserialize and verify a packet body.
pub fn decode_packet<P: Packet>(payload: &[u8]) -> Result<P> {
    let packet: P =
        postcard::from_bytes(payload).with_context(|| format!("Failed to deserialize {}", P::TAG))?;
    packet
        .verify()
        .map_err(|reason| anyhow::anyhow!("Invalid {}: {}", P::TAG, reason))?;
    Ok(packet)
}

/// Build a frame around an already-serialized payload.
pub fn encode_frame(tag: PacketTag, payload: &[u8]) -> Result<Vec<u8>> {
    let length = 1 + payload.len();
    if length > MAX_FRAME_LEN {
        anyhow::bail!("Frame too large: {} bytes (maximum {})", length, MAX_FRAME_LEN);
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + length);
    frame.extend_from_slice(&(length as u32).to_le_bytes());
    frame.push(tag as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Frame a typed packet.
pub fn frame_packet<P: Packet>(packet: &P) -> Result<Vec<u8>> {
    encode_frame(P::TAG, &encode_packet(packet)?)
}

/// Split one frame into its tag and payload.
///
/// Returns the number of bytes consumed so callers can walk a buffer of
/// concatenated frames.
pub fn decode_frame(data: &[u8]) -> Result<(PacketTag, &[u8], usize)> {
    if data.len() < LENGTH_PREFIX + 1 {
        return Err(anyhow::anyhow!(
            "Frame too short: {} bytes (minimum {})",
            data.len(),
            LENGTH_PREFIX + 1
        ));
    }

    let length = frame_length(data[..LENGTH_PREFIX].try_into()?)?;
    if data.len() < LENGTH_PREFIX + length {
        return Err(anyhow::anyhow!(
            "Incomplete frame: expected {} bytes, got {}",
            LENGTH_PREFIX + length,
            data.len()
        ));
    }

    let tag = PacketTag::try_from(data[LENGTH_PREFIX])?;
    let payload = &data[LENGTH_PREFIX + 1..LENGTH_PREFIX + length];
    Ok((tag, payload, LENGTH_PREFIX + length))
}

/// Validate a length prefix read from the wire.
pub fn frame_length(prefix: [u8; LENGTH_PREFIX]) -> Result<usize> {
    let length = u32::from_le_bytes(prefix) as usize;
    if length == 0 {
        anyhow::bail!("Empty frame");
    }
    if length > MAX_FRAME_LEN {
        anyhow::bail!("Frame too large: {} bytes (maximum {})", length, MAX_FRAME_LEN);
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        CommandPacket, CommandRecord, PlayerList, RequestWorld, TimeControl, WorldData,
    };
    use colonysync_core::{Command, CommandKind, RegionId, SimTick};

    #[test]
    fn time_control_frame_layout() {
        let frame = frame_packet(&TimeControl { tick_until: 300 }).unwrap();
        let length = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(length, frame.len() - 4);
        assert_eq!(frame[4], PacketTag::TimeControl as u8);

        let (tag, payload, used) = decode_frame(&frame).unwrap();
        assert_eq!(tag, PacketTag::TimeControl);
        assert_eq!(used, frame.len());
        assert_eq!(
            decode_packet::<TimeControl>(payload).unwrap(),
            TimeControl { tick_until: 300 }
        );
    }

    #[test]
    fn unit_packets_have_empty_payloads() {
        let frame = frame_packet(&RequestWorld).unwrap();
        assert_eq!(frame.len(), 5);
        let (tag, payload, _) = decode_frame(&frame).unwrap();
        assert_eq!(tag, PacketTag::RequestWorld);
        assert!(payload.is_empty());
    }

    #[test]
    fn commands_keep_their_records() {
        let command = Command::region(
            CommandKind::Designator,
            SimTick(42),
            RegionId(7),
            vec![1, 2, 3],
        );
        let packet = WorldData {
            tick_until: 50,
            commands: vec![CommandRecord(command.clone())],
            world: b"{}".to_vec(),
        };
        let frame = frame_packet(&packet).unwrap();
        let (_, payload, _) = decode_frame(&frame).unwrap();
        let decoded = decode_packet::<WorldData>(payload).unwrap();
        assert_eq!(decoded.commands[0].0, command);

        let single = frame_packet(&CommandPacket {
            command: command.into(),
        })
        .unwrap();
        assert_eq!(single[4], PacketTag::Command as u8);
    }

    #[test]
    fn concatenated_frames_walk_in_order() {
        let mut buffer = frame_packet(&TimeControl { tick_until: 1 }).unwrap();
        buffer.extend(
            frame_packet(&PlayerList {
                players: vec!["Alice".into()],
            })
            .unwrap(),
        );

        let (first, _, used) = decode_frame(&buffer).unwrap();
        let (second, _, rest) = decode_frame(&buffer[used..]).unwrap();
        assert_eq!(first, PacketTag::TimeControl);
        assert_eq!(second, PacketTag::PlayerList);
        assert_eq!(used + rest, buffer.len());
    }

    #[test]
    fn short_and_truncated_frames_fail() {
        assert!(decode_frame(&[1, 0, 0]).is_err());
        let frame = frame_packet(&TimeControl { tick_until: 9 }).unwrap();
        assert!(decode_frame(&frame[..frame.len() - 1]).is_err());
        assert!(frame_length([0, 0, 0, 0]).is_err());
        assert!(frame_length([0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn verify_runs_on_decode() {
        let payload = encode_packet(&TimeControl { tick_until: -5 }).unwrap();
        assert!(decode_packet::<TimeControl>(&payload).is_err());
    }
}
