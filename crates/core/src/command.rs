//! Scheduled command records.
//!
//! A command is an action every replica executes at the same tick. Records are
//! immutable once built; the wire shape is
//! `kind: u32, target_tick: i32, region: i32 (-1 = global), len: i32, payload`,
//! all little-endian.

use crate::bytes::{ByteReader, ByteWriter, DecodeError};
use crate::scope::{RegionId, Scope};
use crate::SimTick;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Region id used on the wire for world-scoped commands.
pub const WIRE_GLOBAL_REGION: i32 = -1;

/// Every command kind understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum CommandKind {
    /// Change the world time speed.
    WorldTimeSpeed = 0,
    /// Create the faction for a newly joined owner.
    SetupFaction = 1,
    /// Pause and write a save of the world.
    Autosave = 2,
    /// Change a region's time speed.
    RegionTimeSpeed = 3,
    /// Bootstrap a faction's bundle on a region.
    RegionFactionData = 4,
    /// Hand a region a fresh id block.
    RegionIdBlock = 5,
    /// Apply a designator at a set of cells.
    Designator = 6,
    /// Order a unit to do a job. Forwarded to the gameplay hooks.
    OrderJob = 7,
    /// Remove a zone.
    DeleteZone = 8,
    /// Spawn a unit for a faction.
    SpawnPawn = 9,
    /// Set the forbidden flag of a thing.
    Forbid = 10,
    /// Draft or undraft a unit.
    DraftPawn = 11,
}

impl CommandKind {
    /// All kinds in wire order.
    pub const ALL: [CommandKind; 12] = [
        CommandKind::WorldTimeSpeed,
        CommandKind::SetupFaction,
        CommandKind::Autosave,
        CommandKind::RegionTimeSpeed,
        CommandKind::RegionFactionData,
        CommandKind::RegionIdBlock,
        CommandKind::Designator,
        CommandKind::OrderJob,
        CommandKind::DeleteZone,
        CommandKind::SpawnPawn,
        CommandKind::Forbid,
        CommandKind::DraftPawn,
    ];

    /// Wire discriminant.
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Kind for a wire discriminant.
    pub fn from_wire(value: u32) -> Result<Self, DecodeError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(DecodeError::UnknownCommandKind(value))
    }

    /// Whether this kind addresses the world rather than a region.
    pub fn is_global(self) -> bool {
        matches!(
            self,
            CommandKind::WorldTimeSpeed | CommandKind::SetupFaction | CommandKind::Autosave
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One scheduled action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    kind: CommandKind,
    target_tick: SimTick,
    scope: Scope,
    payload: Vec<u8>,
}

impl Command {
    /// Build a command.
    pub fn new(kind: CommandKind, target_tick: SimTick, scope: Scope, payload: Vec<u8>) -> Self {
        Self {
            kind,
            target_tick,
            scope,
            payload,
        }
    }

    /// World-scoped command.
    pub fn global(kind: CommandKind, target_tick: SimTick, payload: Vec<u8>) -> Self {
        Self::new(kind, target_tick, Scope::Global, payload)
    }

    /// Region-scoped command.
    pub fn region(kind: CommandKind, target_tick: SimTick, region: RegionId, payload: Vec<u8>) -> Self {
        Self::new(kind, target_tick, Scope::Region(region), payload)
    }

    /// What the command does.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Tick at which every replica executes the command.
    pub fn target_tick(&self) -> SimTick {
        self.target_tick
    }

    /// Queue the command belongs to.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Opaque kind-specific payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Append the wire record to `writer`.
    pub fn write_to(&self, writer: &mut ByteWriter) -> Result<(), DecodeError> {
        let tick = self
            .target_tick
            .to_wire()
            .ok_or(DecodeError::InvalidValue {
                field: "command.target_tick",
                value: i64::try_from(self.target_tick.0).unwrap_or(i64::MAX),
            })?;
        let region = match self.scope {
            Scope::Global => WIRE_GLOBAL_REGION,
            Scope::Region(id) => id.0,
        };
        writer
            .write_u32(self.kind.to_wire())
            .write_i32(tick)
            .write_i32(region)
            .write_prefixed_bytes(&self.payload);
        Ok(())
    }

    /// Encode as a standalone wire record.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut writer = ByteWriter::new();
        self.write_to(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Read one wire record.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let kind = CommandKind::from_wire(reader.read_u32()?)?;
        let raw_tick = reader.read_i32()?;
        let target_tick = SimTick::from_wire(raw_tick).ok_or(DecodeError::InvalidTick(raw_tick))?;
        let scope = match reader.read_i32()? {
            WIRE_GLOBAL_REGION => Scope::Global,
            id if id >= 0 => Scope::Region(RegionId(id)),
            other => return Err(DecodeError::InvalidRegion(other)),
        };
        let payload = reader.read_prefixed_bytes()?.to_vec();
        Ok(Self {
            kind,
            target_tick,
            scope,
            payload,
        })
    }

    /// Decode a standalone wire record.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::read_from(&mut ByteReader::new(bytes))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{}] ({} bytes)",
            self.kind,
            self.target_tick,
            self.scope,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_is_little_endian() {
        let cmd = Command::region(CommandKind::Forbid, SimTick(5), RegionId(2), vec![0xAA]);
        let bytes = cmd.encode().unwrap();
        assert_eq!(
            bytes,
            vec![10, 0, 0, 0, 5, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0xAA]
        );
        assert_eq!(Command::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn global_scope_uses_minus_one() {
        let cmd = Command::global(CommandKind::WorldTimeSpeed, SimTick(1), vec![]);
        let bytes = cmd.encode().unwrap();
        assert_eq!(&bytes[8..12], &(-1i32).to_le_bytes());
        assert_eq!(Command::decode(&bytes).unwrap().scope(), Scope::Global);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut writer = ByteWriter::new();
        writer.write_u32(99).write_i32(0).write_i32(-1).write_i32(0);
        assert_eq!(
            Command::decode(&writer.into_bytes()),
            Err(DecodeError::UnknownCommandKind(99))
        );
    }

    #[test]
    fn negative_region_other_than_global_is_rejected() {
        let mut writer = ByteWriter::new();
        writer.write_u32(0).write_i32(0).write_i32(-7).write_i32(0);
        assert_eq!(
            Command::decode(&writer.into_bytes()),
            Err(DecodeError::InvalidRegion(-7))
        );
    }

    #[test]
    fn kinds_roundtrip_through_wire_discriminant() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_wire(kind.to_wire()).unwrap(), kind);
        }
        assert!(CommandKind::Autosave.is_global());
        assert!(!CommandKind::Designator.is_global());
    }
}
