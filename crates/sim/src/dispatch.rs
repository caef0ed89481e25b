//! Command execution.
//!
//! Every handler that acts for a faction runs with that faction's context pushed
//! on the target region, so designations, zones and flags land in the right
//! bundle. Gameplay-only commands are forwarded to [`SimulationHooks::on_command`].

use crate::bundle::{Cell, Designation, DesignationTarget, Thing, ThingId, ZoneKind};
use crate::hooks::SimulationHooks;
use crate::owner::Party;
use crate::payload::{CommandBody, DesignateTarget, DesignatorOrder};
use crate::persist::PersistError;
use crate::region::Region;
use crate::tick::Simulation;
use crate::world::TimeSpeed;
use colonysync_core::{
    Command, CommandKind, DecodeError, FactionId, IdError, OwnerId, RegionId, Scope,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a command could not be executed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The command addresses a region this replica does not have.
    #[error("unknown region {0}")]
    UnknownRegion(RegionId),
    /// The command names a participant without a faction.
    #[error("unknown owner {0}")]
    UnknownOwner(OwnerId),
    /// The command names a thing, area or designator that does not exist.
    #[error("unknown {what} {id}")]
    UnknownTarget {
        /// Kind of target.
        what: &'static str,
        /// Id that was looked up.
        id: String,
    },
    /// A world command arrived in a region queue or the other way round.
    #[error("{kind} command cannot run in {scope}")]
    WrongScope {
        /// Command kind.
        kind: CommandKind,
        /// Scope it was queued in.
        scope: Scope,
    },
    /// The payload is malformed.
    #[error("malformed payload: {0}")]
    Decode(#[from] DecodeError),
    /// An id could not be drawn.
    #[error(transparent)]
    Ids(#[from] IdError),
    /// Saving failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// A gameplay hook failed.
    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether the failure means this replica and the authority disagree about
    /// what exists, which is skipped rather than treated as a bug.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            DispatchError::UnknownRegion(_)
                | DispatchError::UnknownOwner(_)
                | DispatchError::UnknownTarget { .. }
        )
    }
}

fn unknown_thing(id: &ThingId) -> DispatchError {
    DispatchError::UnknownTarget {
        what: "thing",
        id: id.to_string(),
    }
}

/// What a designator name does.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DesignatorAction {
    AddZone(ZoneKind),
    ClearZone,
    ExpandArea(String),
    ClearArea(String),
    NewArea(String),
    Cancel,
    Mark(String),
}

impl DesignatorAction {
    fn parse(order: &DesignatorOrder) -> Result<Self, DispatchError> {
        let area = || {
            order
                .area
                .clone()
                .filter(|area| !area.is_empty())
                .ok_or_else(|| DispatchError::UnknownTarget {
                    what: "area",
                    id: String::new(),
                })
        };
        Ok(match order.designator.as_str() {
            "" => {
                return Err(DispatchError::UnknownTarget {
                    what: "designator",
                    id: String::new(),
                })
            }
            "ZoneAdd_Stockpile" => DesignatorAction::AddZone(ZoneKind::Stockpile),
            "ZoneAdd_Growing" => DesignatorAction::AddZone(ZoneKind::Growing),
            "ZoneDelete" => DesignatorAction::ClearZone,
            "AreaExpand" => DesignatorAction::ExpandArea(area()?),
            "AreaClear" => DesignatorAction::ClearArea(area()?),
            "AreaNew" => DesignatorAction::NewArea(area()?),
            "Cancel" => DesignatorAction::Cancel,
            "Build" if !order.build_def.is_empty() => {
                DesignatorAction::Mark(format!("Build_{}", order.build_def))
            }
            other => DesignatorAction::Mark(other.to_string()),
        })
    }
}

fn region_id(command: &Command) -> Result<RegionId, DispatchError> {
    command.scope().region().ok_or(DispatchError::WrongScope {
        kind: command.kind(),
        scope: command.scope(),
    })
}

impl<H: SimulationHooks> Simulation<H> {
    /// Decode and execute one command against this replica.
    pub fn execute(&mut self, command: &Command) -> Result<(), DispatchError> {
        let body = CommandBody::decode(command.kind(), command.payload())?;
        if command.kind().is_global() != (command.scope() == Scope::Global) {
            return Err(DispatchError::WrongScope {
                kind: command.kind(),
                scope: command.scope(),
            });
        }
        debug!(%command, "executing");

        match body {
            CommandBody::WorldTimeSpeed(speed) => {
                let previous = self.world.speed;
                self.world.speed = speed;
                if previous.is_paused() && !speed.is_paused() {
                    self.world.timer = command.target_tick();
                }
                info!(?speed, timer = %self.world.timer, "world speed set");
                Ok(())
            }
            CommandBody::SetupFaction { owner } => self.setup_faction(owner),
            CommandBody::Autosave => self.autosave(),
            CommandBody::RegionTimeSpeed(speed) => {
                let region = self.region_mut(region_id(command)?)?;
                let previous = region.speed;
                region.speed = speed;
                if previous.is_paused() && !speed.is_paused() {
                    region.timer = command.target_tick();
                }
                debug!(region = %region.id, ?speed, "region speed set");
                Ok(())
            }
            CommandBody::RegionFactionData { owner } => {
                let faction = self
                    .world
                    .faction_of(&owner)
                    .cloned()
                    .ok_or(DispatchError::UnknownOwner(owner.clone()))?;
                let local = owner == self.local_owner;
                let region = self.region_mut(region_id(command)?)?;
                region.ensure_bundle(&faction);
                if local {
                    region.set_active(&faction, true);
                }
                Ok(())
            }
            CommandBody::RegionIdBlock(block) => {
                let id = region_id(command)?;
                self.region_mut(id)?;
                if let Some(block) = self.ids.replace_if_bound(Scope::Region(id), block) {
                    self.region_mut(id)?.id_block = Some(block);
                }
                info!(region = %id, start = block.start(), length = block.length(), "region id block set");
                Ok(())
            }
            CommandBody::Designator(order) => self.designate(region_id(command)?, order),
            CommandBody::OrderJob { unit, job } => {
                let id = region_id(command)?;
                let faction = self.thing_faction(id, &unit)?;
                let party = self.world.party_of(faction.as_ref());
                let Simulation {
                    world, hooks, ids, ..
                } = self;
                let region = world
                    .regions
                    .get_mut(&id)
                    .ok_or(DispatchError::UnknownRegion(id))?;
                let mut scope = region.with_owner(party);
                hooks.on_command(&mut scope, faction.as_ref(), command, &job, ids)?;
                Ok(())
            }
            CommandBody::DeleteZone { faction, zone } => {
                let party = self.world.party_of(Some(&faction));
                let region = self.region_mut(region_id(command)?)?;
                let mut scope = region.with_owner(party);
                let deleted = scope
                    .active_bundle_mut()
                    .is_some_and(|bundle| bundle.delete_zone(&zone));
                if !deleted {
                    debug!(%zone, %faction, "zone already gone");
                }
                Ok(())
            }
            CommandBody::SpawnPawn { faction, data } => {
                let id = region_id(command)?;
                let party = self.world.party_of(Some(&faction));
                let Simulation {
                    world, hooks, ids, ..
                } = self;
                let region = world
                    .regions
                    .get_mut(&id)
                    .ok_or(DispatchError::UnknownRegion(id))?;
                let mut scope = region.with_owner(party);
                let unit = ThingId::unit(ids.next()?);
                let cell = scope.center_cell();
                scope.insert_thing(
                    unit.clone(),
                    Thing {
                        def: "Unit".to_string(),
                        faction: Some(faction.clone()),
                        cell,
                        count: 1,
                        haulable: false,
                        drafted: false,
                    },
                );
                info!(%unit, %faction, "spawned unit");
                hooks.on_command(&mut scope, Some(&faction), command, &data, ids)?;
                Ok(())
            }
            CommandBody::Forbid {
                thing,
                faction,
                value,
            } => {
                let party = self.world.party_of(Some(&faction));
                let region = self.region_mut(region_id(command)?)?;
                if region.thing(&thing).is_none() {
                    return Err(unknown_thing(&thing));
                }
                let mut scope = region.with_owner(party);
                if let Some(bundle) = scope.active_bundle_mut() {
                    bundle.forbidden.insert(thing, value);
                }
                Ok(())
            }
            CommandBody::DraftPawn { unit, drafted } => {
                let id = region_id(command)?;
                let faction = self.thing_faction(id, &unit)?;
                let party = self.world.party_of(faction.as_ref());
                let region = self.region_mut(id)?;
                let mut scope = region.with_owner(party);
                if let Some(thing) = scope.things.get_mut(&unit) {
                    thing.drafted = drafted;
                }
                Ok(())
            }
        }
    }

    fn region_mut(&mut self, id: RegionId) -> Result<&mut Region, DispatchError> {
        self.world
            .regions
            .get_mut(&id)
            .ok_or(DispatchError::UnknownRegion(id))
    }

    fn thing_faction(&self, id: RegionId, thing: &ThingId) -> Result<Option<FactionId>, DispatchError> {
        let region = self
            .world
            .regions
            .get(&id)
            .ok_or(DispatchError::UnknownRegion(id))?;
        region
            .thing(thing)
            .map(|thing| thing.faction.clone())
            .ok_or_else(|| unknown_thing(thing))
    }

    fn setup_faction(&mut self, owner: OwnerId) -> Result<(), DispatchError> {
        if self.world.owner_factions.contains_key(&owner) {
            debug!(%owner, "owner already has a faction");
            return Ok(());
        }
        let faction = FactionId::from_unique(self.ids.next()?);
        info!(%faction, %owner, "new faction");
        let local = owner == self.local_owner;
        self.world.owner_factions.insert(owner, faction);
        if local {
            self.activate_local_faction();
        }
        Ok(())
    }

    fn autosave(&mut self) -> Result<(), DispatchError> {
        self.world.speed = TimeSpeed::Paused;

        let bound = self.ids.bound_scope();
        self.unbind();
        for region in self.world.regions.values_mut() {
            let parent = region.parent.clone();
            region.set_active(&parent, true);
        }

        let saved = self.save_document();
        let hooked = match &saved {
            Ok(document) => self.hooks.on_save(document),
            Err(_) => Ok(()),
        };

        self.activate_local_faction();
        if let Some(scope) = bound {
            self.bind(scope);
        }

        let document = saved?;
        hooked?;
        info!(timer = %self.world.timer, "autosaved");
        self.last_save = Some(document);
        Ok(())
    }

    fn designate(&mut self, id: RegionId, order: DesignatorOrder) -> Result<(), DispatchError> {
        let action = DesignatorAction::parse(&order)?;
        let party = self.world.party_of(Some(&order.faction));
        let region = self.region_mut(id)?;

        if let DesignateTarget::Thing(thing) = &order.target {
            if region.thing(thing).is_none() {
                return Err(unknown_thing(thing));
            }
        }
        let cells: Vec<Cell> = match &order.target {
            DesignateTarget::Cell(cell) => vec![*cell],
            DesignateTarget::Cells(cells) => cells.clone(),
            DesignateTarget::Thing(_) => Vec::new(),
        };
        let (cells, outside): (Vec<Cell>, Vec<Cell>) =
            cells.into_iter().partition(|cell| region.contains_cell(*cell));
        if !outside.is_empty() {
            warn!(region = %id, count = outside.len(), "ignoring designation cells outside the region");
        }
        let targets: Vec<DesignationTarget> = match &order.target {
            DesignateTarget::Thing(thing) => vec![DesignationTarget::Thing(thing.clone())],
            _ => cells.iter().copied().map(DesignationTarget::Cell).collect(),
        };

        let mut scope = region.with_owner(party);
        if let DesignatorAction::NewArea(area) = &action {
            scope.add_user_area(area);
        }
        let Some(bundle) = scope.active_bundle_mut() else {
            return Ok(());
        };
        match action {
            DesignatorAction::AddZone(kind) => {
                bundle.add_zone(kind, cells);
            }
            DesignatorAction::ClearZone => bundle.clear_zone_cells(&cells),
            DesignatorAction::ExpandArea(area) | DesignatorAction::NewArea(area) => {
                let area = bundle.areas.get_mut(&area).ok_or(DispatchError::UnknownTarget {
                    what: "area",
                    id: area,
                })?;
                area.cells.extend(cells);
            }
            DesignatorAction::ClearArea(area) => {
                let area = bundle.areas.get_mut(&area).ok_or(DispatchError::UnknownTarget {
                    what: "area",
                    id: area,
                })?;
                for cell in &cells {
                    area.cells.remove(cell);
                }
            }
            DesignatorAction::Cancel => {
                bundle
                    .designations
                    .retain(|designation| !targets.contains(&designation.target));
            }
            DesignatorAction::Mark(def) => {
                for target in targets {
                    bundle.designations.insert(Designation {
                        def: def.clone(),
                        target,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use crate::world::WorldState;
    use colonysync_core::{IdBlock, SimTick};

    fn alice_world() -> Simulation {
        let alice = FactionId::new("Faction_A");
        let mut sim = Simulation::new(
            WorldState::new()
                .with_owner(OwnerId::new("Alice"), alice.clone())
                .with_global_block(IdBlock::new(1000, 10)),
            OwnerId::new("Alice"),
            NoopHooks,
        );
        sim.insert_region(Region::new(RegionId(0), alice, true).with_id_block(IdBlock::new(5000, 10)));
        sim
    }

    fn region_cmd(body: CommandBody) -> Command {
        body.into_command(SimTick(0), Scope::Region(RegionId(0)))
    }

    #[test]
    fn setup_faction_draws_from_bound_block() {
        let mut sim = alice_world();
        let cmd = CommandBody::SetupFaction {
            owner: OwnerId::new("Bob"),
        }
        .into_command(SimTick(0), Scope::Global);

        assert!(matches!(
            sim.execute(&cmd),
            Err(DispatchError::Ids(IdError::NoActiveBlock))
        ));

        sim.bind(Scope::Global);
        sim.execute(&cmd).unwrap();
        sim.unbind();
        assert_eq!(
            sim.world().faction_of(&OwnerId::new("Bob")),
            Some(&FactionId::new("Faction_1000"))
        );
        assert_eq!(sim.world().global_block().unwrap().cursor(), 1);
    }

    #[test]
    fn wrong_scope_is_rejected() {
        let mut sim = alice_world();
        let cmd = CommandBody::WorldTimeSpeed(TimeSpeed::Fast)
            .into_command(SimTick(0), Scope::Region(RegionId(0)));
        assert!(matches!(
            sim.execute(&cmd),
            Err(DispatchError::WrongScope { .. })
        ));
    }

    #[test]
    fn forbid_of_unknown_thing_is_a_desync() {
        let mut sim = alice_world();
        let err = sim
            .execute(&region_cmd(CommandBody::Forbid {
                thing: ThingId::new("Steel9"),
                faction: FactionId::new("Faction_A"),
                value: true,
            }))
            .unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn region_id_block_replaces_bound_block() {
        let mut sim = alice_world();
        sim.bind(Scope::Region(RegionId(0)));
        sim.execute(&region_cmd(CommandBody::RegionIdBlock(IdBlock::new(9000, 5))))
            .unwrap();
        sim.unbind();
        let region = sim.world().region(RegionId(0)).unwrap();
        assert_eq!(region.id_block().unwrap().start(), 9000);
    }

    #[test]
    fn designations_land_in_the_designating_faction() {
        let mut sim = alice_world();
        sim.execute(&region_cmd(CommandBody::Designator(DesignatorOrder {
            designator: "Mine".into(),
            build_def: String::new(),
            faction: FactionId::new("Faction_A"),
            area: None,
            target: DesignateTarget::Cells(vec![1, 2, -5]),
        })))
        .unwrap();
        let region = sim.world().region(RegionId(0)).unwrap();
        let bundle = region.bundle(&FactionId::new("Faction_A")).unwrap();
        assert_eq!(bundle.designations.len(), 2);
        assert_eq!(region.context_depth(), 0);
    }

    #[test]
    fn new_area_notifies_once() {
        let mut sim = alice_world();
        let new_area = |cell| {
            region_cmd(CommandBody::Designator(DesignatorOrder {
                designator: "AreaNew".into(),
                build_def: String::new(),
                faction: FactionId::new("Faction_A"),
                area: Some("Animals".into()),
                target: DesignateTarget::Cell(cell),
            }))
        };
        sim.execute(&new_area(1)).unwrap();
        sim.execute(&new_area(2)).unwrap();
        let region = sim.world.region_mut(RegionId(0)).unwrap();
        assert_eq!(region.take_notices().len(), 1);
        let bundle = region.bundle(&FactionId::new("Faction_A")).unwrap();
        assert_eq!(bundle.areas["Animals"].cells.len(), 2);
    }
}
