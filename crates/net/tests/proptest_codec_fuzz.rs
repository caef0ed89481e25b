//! Fuzz-style property tests for the packet codec.
//!
//! Decoders must reject arbitrary network input without panicking.

use colonysync_core::{Command, CommandKind, RegionId, SimTick};
use colonysync_net::{
    decode_frame, decode_packet, frame_packet, CommandRecord, PacketTag, PlayerList,
    RegionResponse, TimeControl, WorldData, MAX_NAME_LEN,
};
use proptest::prelude::*;

fn command() -> impl Strategy<Value = Command> {
    (
        0..CommandKind::ALL.len(),
        0u64..1_000_000,
        -1i32..64,
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(kind, tick, region, payload)| {
            let kind = CommandKind::ALL[kind];
            if kind.is_global() || region < 0 {
                Command::global(kind, SimTick(tick), payload)
            } else {
                Command::region(kind, SimTick(tick), RegionId(region), payload)
            }
        })
}

proptest! {
    /// Property: Arbitrary bytes don't crash the frame decoder
    #[test]
    fn arbitrary_bytes_dont_crash_frames(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        if let Ok((tag, payload, used)) = decode_frame(&random_bytes) {
            prop_assert!(used <= random_bytes.len());
            prop_assert_eq!(payload.len() + 5, used);
            let _ = PacketTag::try_from(tag as u8);
        }
    }

    /// Property: Arbitrary payloads don't crash typed decoders
    #[test]
    fn arbitrary_payloads_dont_crash_packets(
        random_bytes in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let _ = decode_packet::<WorldData>(&random_bytes);
        let _ = decode_packet::<RegionResponse>(&random_bytes);
        let _ = decode_packet::<PlayerList>(&random_bytes);
        let _ = decode_packet::<TimeControl>(&random_bytes);
    }

    /// Property: World data keeps commands in issue order
    #[test]
    fn world_data_roundtrips(
        tick_until in 0i32..i32::MAX,
        commands in prop::collection::vec(command(), 0..16),
        world in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let packet = WorldData {
            tick_until,
            commands: commands.iter().cloned().map(CommandRecord).collect(),
            world,
        };
        let frame = frame_packet(&packet).unwrap();
        let (tag, payload, used) = decode_frame(&frame).unwrap();
        prop_assert_eq!(tag, PacketTag::WorldData);
        prop_assert_eq!(used, frame.len());
        prop_assert_eq!(decode_packet::<WorldData>(payload).unwrap(), packet);
    }

    /// Property: Oversized player names are rejected after decoding
    #[test]
    fn long_player_names_rejected(extra in 1usize..32) {
        let packet = PlayerList { players: vec!["a".repeat(MAX_NAME_LEN + extra)] };
        let frame = frame_packet(&packet).unwrap();
        let (_, payload, _) = decode_frame(&frame).unwrap();
        prop_assert!(decode_packet::<PlayerList>(payload).is_err());
    }
}
