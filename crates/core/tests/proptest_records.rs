//! Property tests for command records and id blocks.

use colonysync_core::{Command, CommandKind, IdBlock, RegionId, SimTick};
use proptest::prelude::*;

proptest! {
    /// Property: arbitrary bytes never panic the command decoder
    #[test]
    fn arbitrary_bytes_dont_crash_command_decoder(
        random_bytes in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let _result = Command::decode(&random_bytes);
    }

    /// Property: a block serialized after k issues continues at start + k
    #[test]
    fn id_block_resumes_after_persist(
        start in 0i32..1_000_000,
        length in 1i32..10_000,
        issued_fraction in 0.0f64..1.0,
    ) {
        let issued = ((length as f64) * issued_fraction) as i32;
        let mut block = IdBlock::new(start, length);
        for _ in 0..issued {
            block.next_id().unwrap();
        }

        let mut restored = IdBlock::from_base64(&block.to_base64()).unwrap();
        prop_assert_eq!(restored.cursor(), issued);
        if issued < length {
            prop_assert_eq!(restored.next_id().unwrap(), start + issued);
        } else {
            prop_assert!(restored.next_id().is_err());
        }
    }

    /// Property: region commands keep their fields through the wire record
    #[test]
    fn region_commands_roundtrip(
        kind_index in 0usize..CommandKind::ALL.len(),
        tick in 0i32..i32::MAX,
        region in 0i32..4096,
        payload in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let cmd = Command::region(
            CommandKind::ALL[kind_index],
            SimTick(tick as u64),
            RegionId(region),
            payload,
        );
        let decoded = Command::decode(&cmd.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, cmd);
    }
}
