//! Typed command payloads.
//!
//! [`CommandBody`] is the decoded form of a [`Command`]'s payload. Field order
//! follows the byte layout; strings and byte blobs are `i32` length prefixed.

use crate::bundle::{Cell, ThingId};
use crate::world::TimeSpeed;
use colonysync_core::{
    ByteReader, ByteWriter, Command, CommandKind, DecodeError, FactionId, IdBlock, OwnerId, Scope,
    SimTick,
};

/// Designator names that carry an area id in their state.
const AREA_DESIGNATORS: [&str; 3] = ["AreaExpand", "AreaClear", "AreaNew"];

/// Where a designator is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesignateTarget {
    /// Mode 0: one cell.
    Cell(Cell),
    /// Mode 1: a drag over many cells.
    Cells(Vec<Cell>),
    /// Mode 2: a thing.
    Thing(ThingId),
}

impl DesignateTarget {
    fn mode(&self) -> i32 {
        match self {
            DesignateTarget::Cell(_) => 0,
            DesignateTarget::Cells(_) => 1,
            DesignateTarget::Thing(_) => 2,
        }
    }
}

/// A designator use on behalf of a faction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignatorOrder {
    /// Designator name, e.g. `Mine`, `ZoneAdd_Stockpile`, `AreaExpand`.
    pub designator: String,
    /// Def placed by build designators; empty otherwise.
    pub build_def: String,
    /// Faction the designation belongs to.
    pub faction: FactionId,
    /// Area operated on by area designators.
    pub area: Option<String>,
    /// Where it applies.
    pub target: DesignateTarget,
}

impl DesignatorOrder {
    fn uses_area(name: &str) -> bool {
        AREA_DESIGNATORS.contains(&name)
    }
}

/// Decoded payload of every command kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    /// Change the world speed.
    WorldTimeSpeed(TimeSpeed),
    /// Create a faction for `owner` if it has none.
    SetupFaction {
        /// Joining participant.
        owner: OwnerId,
    },
    /// Pause and save.
    Autosave,
    /// Change a region's speed.
    RegionTimeSpeed(TimeSpeed),
    /// Bootstrap `owner`'s faction state on a region.
    RegionFactionData {
        /// Participant whose faction gets a bundle.
        owner: OwnerId,
    },
    /// New id block for a region.
    RegionIdBlock(IdBlock),
    /// Use a designator.
    Designator(DesignatorOrder),
    /// Order a unit; everything after the unit id is gameplay data.
    OrderJob {
        /// Unit receiving the job.
        unit: ThingId,
        /// Opaque job description.
        job: Vec<u8>,
    },
    /// Delete a zone by label.
    DeleteZone {
        /// Faction owning the zone.
        faction: FactionId,
        /// Zone label.
        zone: String,
    },
    /// Spawn a unit for a faction.
    SpawnPawn {
        /// Faction of the new unit.
        faction: FactionId,
        /// Opaque unit description.
        data: Vec<u8>,
    },
    /// Set a thing's forbidden flag for a faction.
    Forbid {
        /// Target thing.
        thing: ThingId,
        /// Faction whose flag changes.
        faction: FactionId,
        /// New flag.
        value: bool,
    },
    /// Draft or undraft a unit.
    DraftPawn {
        /// Target unit.
        unit: ThingId,
        /// New drafted state.
        drafted: bool,
    },
}

fn read_speed(reader: &mut ByteReader<'_>) -> Result<TimeSpeed, DecodeError> {
    let raw = reader.read_u8()?;
    TimeSpeed::from_u8(raw).ok_or(DecodeError::InvalidValue {
        field: "time_speed",
        value: raw.into(),
    })
}

impl CommandBody {
    /// Kind this body encodes as.
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandBody::WorldTimeSpeed(_) => CommandKind::WorldTimeSpeed,
            CommandBody::SetupFaction { .. } => CommandKind::SetupFaction,
            CommandBody::Autosave => CommandKind::Autosave,
            CommandBody::RegionTimeSpeed(_) => CommandKind::RegionTimeSpeed,
            CommandBody::RegionFactionData { .. } => CommandKind::RegionFactionData,
            CommandBody::RegionIdBlock(_) => CommandKind::RegionIdBlock,
            CommandBody::Designator(_) => CommandKind::Designator,
            CommandBody::OrderJob { .. } => CommandKind::OrderJob,
            CommandBody::DeleteZone { .. } => CommandKind::DeleteZone,
            CommandBody::SpawnPawn { .. } => CommandKind::SpawnPawn,
            CommandBody::Forbid { .. } => CommandKind::Forbid,
            CommandBody::DraftPawn { .. } => CommandKind::DraftPawn,
        }
    }

    /// Payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            CommandBody::WorldTimeSpeed(speed) | CommandBody::RegionTimeSpeed(speed) => {
                w.write_u8(speed.to_u8());
            }
            CommandBody::SetupFaction { owner } | CommandBody::RegionFactionData { owner } => {
                w.write_string(owner.as_str());
            }
            CommandBody::Autosave => {}
            CommandBody::RegionIdBlock(block) => {
                return block.to_bytes();
            }
            CommandBody::Designator(order) => {
                w.write_i32(order.target.mode())
                    .write_string(&order.designator)
                    .write_string(&order.build_def)
                    .write_string(order.faction.as_str());
                if DesignatorOrder::uses_area(&order.designator) {
                    w.write_string(order.area.as_deref().unwrap_or_default());
                }
                match &order.target {
                    DesignateTarget::Cell(cell) => w.write_i32(*cell),
                    DesignateTarget::Cells(cells) => w.write_prefixed_i32s(cells),
                    DesignateTarget::Thing(thing) => w.write_string(thing.as_str()),
                };
            }
            CommandBody::OrderJob { unit, job } => {
                w.write_string(unit.as_str());
                let mut bytes = w.into_bytes();
                bytes.extend_from_slice(job);
                return bytes;
            }
            CommandBody::DeleteZone { faction, zone } => {
                w.write_string(faction.as_str()).write_string(zone);
            }
            CommandBody::SpawnPawn { faction, data } => {
                w.write_string(faction.as_str()).write_prefixed_bytes(data);
            }
            CommandBody::Forbid {
                thing,
                faction,
                value,
            } => {
                w.write_string(thing.as_str())
                    .write_string(faction.as_str())
                    .write_bool(*value);
            }
            CommandBody::DraftPawn { unit, drafted } => {
                w.write_string(unit.as_str()).write_bool(*drafted);
            }
        }
        w.into_bytes()
    }

    /// Decode the payload of a `kind` command.
    pub fn decode(kind: CommandKind, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(payload);
        let body = match kind {
            CommandKind::WorldTimeSpeed => CommandBody::WorldTimeSpeed(read_speed(&mut r)?),
            CommandKind::RegionTimeSpeed => CommandBody::RegionTimeSpeed(read_speed(&mut r)?),
            CommandKind::SetupFaction => CommandBody::SetupFaction {
                owner: OwnerId::new(r.read_string()?),
            },
            CommandKind::RegionFactionData => CommandBody::RegionFactionData {
                owner: OwnerId::new(r.read_string()?),
            },
            CommandKind::Autosave => CommandBody::Autosave,
            CommandKind::RegionIdBlock => CommandBody::RegionIdBlock(IdBlock::read_from(&mut r)?),
            CommandKind::Designator => {
                let mode = r.read_i32()?;
                let designator = r.read_string()?;
                let build_def = r.read_string()?;
                let faction = FactionId::new(r.read_string()?);
                let area = if DesignatorOrder::uses_area(&designator) {
                    Some(r.read_string()?)
                } else {
                    None
                };
                let target = match mode {
                    0 => DesignateTarget::Cell(r.read_i32()?),
                    1 => DesignateTarget::Cells(r.read_prefixed_i32s()?),
                    2 => DesignateTarget::Thing(ThingId::new(r.read_string()?)),
                    other => {
                        return Err(DecodeError::InvalidValue {
                            field: "designator.mode",
                            value: other.into(),
                        })
                    }
                };
                CommandBody::Designator(DesignatorOrder {
                    designator,
                    build_def,
                    faction,
                    area,
                    target,
                })
            }
            CommandKind::OrderJob => {
                let unit = ThingId::new(r.read_string()?);
                let job = payload[payload.len() - r.remaining()..].to_vec();
                return Ok(CommandBody::OrderJob { unit, job });
            }
            CommandKind::DeleteZone => CommandBody::DeleteZone {
                faction: FactionId::new(r.read_string()?),
                zone: r.read_string()?,
            },
            CommandKind::SpawnPawn => CommandBody::SpawnPawn {
                faction: FactionId::new(r.read_string()?),
                data: r.read_prefixed_bytes()?.to_vec(),
            },
            CommandKind::Forbid => CommandBody::Forbid {
                thing: ThingId::new(r.read_string()?),
                faction: FactionId::new(r.read_string()?),
                value: r.read_bool()?,
            },
            CommandKind::DraftPawn => CommandBody::DraftPawn {
                unit: ThingId::new(r.read_string()?),
                drafted: r.read_bool()?,
            },
        };
        Ok(body)
    }

    /// Build the command scheduled at `tick` in `scope`.
    pub fn into_command(self, tick: SimTick, scope: Scope) -> Command {
        Command::new(self.kind(), tick, scope, self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_designators_carry_area_state() {
        let body = CommandBody::Designator(DesignatorOrder {
            designator: "AreaExpand".into(),
            build_def: String::new(),
            faction: FactionId::new("Faction_1"),
            area: Some("Home".into()),
            target: DesignateTarget::Cells(vec![3, 4]),
        });
        assert_eq!(
            CommandBody::decode(CommandKind::Designator, &body.encode()).unwrap(),
            body
        );
    }

    #[test]
    fn order_job_keeps_trailing_bytes() {
        let body = CommandBody::OrderJob {
            unit: ThingId::new("Unit7"),
            job: vec![1, 2, 3],
        };
        let bytes = body.encode();
        assert_eq!(CommandBody::decode(CommandKind::OrderJob, &bytes).unwrap(), body);
    }

    #[test]
    fn bad_speed_and_mode_are_rejected() {
        assert!(CommandBody::decode(CommandKind::WorldTimeSpeed, &[9]).is_err());

        let mut w = ByteWriter::new();
        w.write_i32(5)
            .write_string("Mine")
            .write_string("")
            .write_string("Faction_1");
        assert!(matches!(
            CommandBody::decode(CommandKind::Designator, &w.into_bytes()),
            Err(DecodeError::InvalidValue {
                field: "designator.mode",
                ..
            })
        ));
    }

    #[test]
    fn empty_payload_fails_cleanly() {
        for kind in CommandKind::ALL {
            if kind == CommandKind::Autosave {
                continue;
            }
            assert!(CommandBody::decode(kind, &[]).is_err(), "{kind} accepted empty payload");
        }
    }
}
