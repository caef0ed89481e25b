//! World-level replicated state.

use crate::owner::Party;
use crate::region::Region;
use colonysync_core::{FactionId, IdBlock, OwnerId, RegionId, SimTick};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Game speed. Every step at a non-zero speed advances the clock by one tick;
/// the multiplier is how many steps run per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimeSpeed {
    /// Stopped.
    Paused = 0,
    /// 1x.
    #[default]
    Normal = 1,
    /// 3x.
    Fast = 2,
    /// 6x.
    Superfast = 3,
    /// 15x.
    Ultrafast = 4,
}

impl TimeSpeed {
    /// Steps per frame.
    pub fn multiplier(self) -> u32 {
        match self {
            TimeSpeed::Paused => 0,
            TimeSpeed::Normal => 1,
            TimeSpeed::Fast => 3,
            TimeSpeed::Superfast => 6,
            TimeSpeed::Ultrafast => 15,
        }
    }

    /// Whether the clock is stopped.
    pub fn is_paused(self) -> bool {
        self == TimeSpeed::Paused
    }

    /// Speed for a wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => TimeSpeed::Paused,
            1 => TimeSpeed::Normal,
            2 => TimeSpeed::Fast,
            3 => TimeSpeed::Superfast,
            4 => TimeSpeed::Ultrafast,
            _ => return None,
        })
    }

    /// Wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Everything replicated at world scope.
#[derive(Debug)]
pub struct WorldState {
    pub(crate) world_id: String,
    pub(crate) session_id: u32,
    pub(crate) timer: SimTick,
    pub(crate) speed: TimeSpeed,
    pub(crate) owner_factions: BTreeMap<OwnerId, FactionId>,
    pub(crate) global_block: Option<IdBlock>,
    pub(crate) regions: BTreeMap<RegionId, Region>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldState {
    /// Fresh world with a random id and session id.
    pub fn new() -> Self {
        Self {
            world_id: uuid::Uuid::new_v4().to_string(),
            session_id: rand::random(),
            timer: SimTick::ZERO,
            speed: TimeSpeed::Normal,
            owner_factions: BTreeMap::new(),
            global_block: None,
            regions: BTreeMap::new(),
        }
    }

    /// Builder: global id block.
    pub fn with_global_block(mut self, block: IdBlock) -> Self {
        self.global_block = Some(block);
        self
    }

    /// Builder: record that `owner` plays as `faction`.
    pub fn with_owner(mut self, owner: OwnerId, faction: FactionId) -> Self {
        self.owner_factions.insert(owner, faction);
        self
    }

    /// Stable world id.
    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    /// Session id.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Global clock.
    pub fn timer(&self) -> SimTick {
        self.timer
    }

    /// World time speed.
    pub fn speed(&self) -> TimeSpeed {
        self.speed
    }

    /// Global id block; `None` while bound to the allocator.
    pub fn global_block(&self) -> Option<&IdBlock> {
        self.global_block.as_ref()
    }

    /// Faction an owner plays as.
    pub fn faction_of(&self, owner: &OwnerId) -> Option<&FactionId> {
        self.owner_factions.get(owner)
    }

    /// Owner → faction map.
    pub fn owner_factions(&self) -> &BTreeMap<OwnerId, FactionId> {
        &self.owner_factions
    }

    /// Owner playing as `faction`.
    pub fn owner_of(&self, faction: &FactionId) -> Option<&OwnerId> {
        self.owner_factions
            .iter()
            .find_map(|(owner, id)| (id == faction).then_some(owner))
    }

    /// Context eligibility of a faction: player factions are those owned by a
    /// participant.
    pub fn party_of(&self, faction: Option<&FactionId>) -> Party {
        match faction {
            Some(id) if self.owner_of(id).is_some() => Party::Player(id.clone()),
            _ => Party::NonPlayer,
        }
    }

    /// Region by id.
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Region by id, mutably.
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(&id)
    }

    /// All regions in id order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Ids of all regions.
    pub fn region_ids(&self) -> Vec<RegionId> {
        self.regions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_multipliers() {
        let speeds = [
            TimeSpeed::Paused,
            TimeSpeed::Normal,
            TimeSpeed::Fast,
            TimeSpeed::Superfast,
            TimeSpeed::Ultrafast,
        ];
        let multipliers: Vec<u32> = speeds.iter().map(|s| s.multiplier()).collect();
        assert_eq!(multipliers, vec![0, 1, 3, 6, 15]);
        for speed in speeds {
            assert_eq!(TimeSpeed::from_u8(speed.to_u8()), Some(speed));
        }
        assert_eq!(TimeSpeed::from_u8(9), None);
    }

    #[test]
    fn only_owned_factions_are_players() {
        let world = WorldState::new().with_owner(OwnerId::new("Alice"), FactionId::new("Faction_1"));
        assert_eq!(
            world.party_of(Some(&FactionId::new("Faction_1"))),
            Party::Player(FactionId::new("Faction_1"))
        );
        assert_eq!(world.party_of(Some(&FactionId::new("Faction_7"))), Party::NonPlayer);
        assert_eq!(world.party_of(None), Party::NonPlayer);
    }
}
