//! Per-faction region state.
//!
//! A region keeps one [`RegionStateBundle`] for every faction that has been active
//! on it. Bundles are created lazily the first time a faction touches the region
//! and seeded with the same baseline content a freshly settled region gets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique load id of a thing placed on a region (items, units, buildings).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThingId(String);

impl ThingId {
    /// Wrap a load id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of a unit spawned from a unique numeric id.
    pub fn unit(id: i32) -> Self {
        Self(format!("Unit{id}"))
    }

    /// Borrow the load id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThingId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Cell index within a region.
pub type Cell = i32;

/// Labels of the areas every bundle starts with.
pub const STARTING_AREAS: [&str; 4] = ["Home", "BuildRoof", "NoRoof", "SnowClear"];

/// What a designation points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DesignationTarget {
    /// A cell.
    Cell(Cell),
    /// A thing.
    Thing(ThingId),
}

/// A marked order such as mining a cell or hauling a thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Designation {
    /// Designation def, e.g. `Mine` or `Haul`.
    pub def: String,
    /// Where it applies.
    pub target: DesignationTarget,
}

/// A named set of cells with a faction-specific meaning (home, roof, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Area id, unique within a bundle.
    pub id: String,
    /// Cells covered.
    pub cells: BTreeSet<Cell>,
    /// Whether a player created it (as opposed to a starting area).
    pub user_created: bool,
}

/// Zone flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    /// Storage; backs a slot group.
    Stockpile,
    /// Farmland.
    Growing,
}

/// A labelled cell group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Label, unique within a bundle.
    pub label: String,
    /// Zone flavour.
    pub kind: ZoneKind,
    /// Cells covered.
    pub cells: BTreeSet<Cell>,
}

/// A thing placed on a region, shared by every faction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thing {
    /// Thing def, e.g. `Steel`.
    pub def: String,
    /// Owning faction; `None` for unowned things.
    pub faction: Option<colonysync_core::FactionId>,
    /// Cell the thing sits on.
    pub cell: Cell,
    /// Stack count.
    pub count: u32,
    /// Whether the thing can be hauled.
    pub haulable: bool,
    /// Drafted state for units.
    pub drafted: bool,
}

/// Everything one faction sees privately on one region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStateBundle {
    /// Pending designations.
    pub designations: BTreeSet<Designation>,
    /// Areas keyed by id.
    pub areas: BTreeMap<String, Area>,
    /// Zones keyed by label.
    pub zones: BTreeMap<String, Zone>,
    /// Per-thing forbidden flags. Missing entries are not forbidden.
    pub forbidden: BTreeMap<ThingId, bool>,
    /// Counter for generating zone labels.
    pub zone_counter: u32,
    /// Labels of stockpile zones acting as storage. Rebuilt, not persisted.
    #[serde(skip)]
    pub slot_groups: BTreeSet<String>,
    /// Things waiting to be hauled to storage. Rebuilt each tick.
    #[serde(skip)]
    pub haulables: Vec<ThingId>,
    /// Stored resource totals by def. Rebuilt each tick.
    #[serde(skip)]
    pub resource_counts: BTreeMap<String, u32>,
}

/// Side effects the region reports to whoever renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionNotice {
    /// A user-created area was added.
    AreaAdded {
        /// Faction owning the bundle.
        faction: Option<colonysync_core::FactionId>,
        /// New area id.
        area: String,
    },
}

impl RegionStateBundle {
    /// A bundle seeded with the starting areas.
    ///
    /// Seeding never produces an [`RegionNotice::AreaAdded`].
    pub fn bootstrap() -> Self {
        let mut bundle = Self::default();
        for id in STARTING_AREAS {
            bundle.insert_area(id, false);
        }
        bundle
    }

    /// Insert an area if absent. Returns whether it was new.
    pub fn insert_area(&mut self, id: &str, user_created: bool) -> bool {
        if self.areas.contains_key(id) {
            return false;
        }
        self.areas.insert(
            id.to_string(),
            Area {
                id: id.to_string(),
                cells: BTreeSet::new(),
                user_created,
            },
        );
        true
    }

    /// Whether `thing` is forbidden for this faction.
    pub fn is_forbidden(&self, thing: &ThingId) -> bool {
        self.forbidden.get(thing).copied().unwrap_or(false)
    }

    /// Zone containing `cell`, if any.
    pub fn zone_at(&self, cell: Cell) -> Option<&Zone> {
        self.zones.values().find(|zone| zone.cells.contains(&cell))
    }

    /// Create a zone over `cells`, skipping cells another zone already covers.
    /// Returns the new label, or `None` when every cell was taken.
    pub fn add_zone(&mut self, kind: ZoneKind, cells: impl IntoIterator<Item = Cell>) -> Option<String> {
        let free: BTreeSet<Cell> = cells
            .into_iter()
            .filter(|cell| self.zone_at(*cell).is_none())
            .collect();
        if free.is_empty() {
            return None;
        }
        self.zone_counter += 1;
        let prefix = match kind {
            ZoneKind::Stockpile => "Stockpile zone",
            ZoneKind::Growing => "Growing zone",
        };
        let label = format!("{prefix} {}", self.zone_counter);
        self.zones.insert(
            label.clone(),
            Zone {
                label: label.clone(),
                kind,
                cells: free,
            },
        );
        self.rebuild_slot_groups();
        Some(label)
    }

    /// Remove cells from whichever zones hold them; empty zones are deleted.
    pub fn clear_zone_cells(&mut self, cells: &[Cell]) {
        for zone in self.zones.values_mut() {
            for cell in cells {
                zone.cells.remove(cell);
            }
        }
        self.zones.retain(|_, zone| !zone.cells.is_empty());
        self.rebuild_slot_groups();
    }

    /// Delete a zone by label. Returns whether it existed.
    pub fn delete_zone(&mut self, label: &str) -> bool {
        let removed = self.zones.remove(label).is_some();
        if removed {
            self.rebuild_slot_groups();
        }
        removed
    }

    /// Recompute the storage slot groups from stockpile zones.
    pub fn rebuild_slot_groups(&mut self) {
        self.slot_groups = self
            .zones
            .values()
            .filter(|zone| zone.kind == ZoneKind::Stockpile)
            .map(|zone| zone.label.clone())
            .collect();
    }

    fn in_storage(&self, cell: Cell) -> bool {
        self.zone_at(cell)
            .is_some_and(|zone| self.slot_groups.contains(&zone.label))
    }

    /// Rebuild the haulables list: haulable things not forbidden to this faction
    /// and not already in storage.
    pub fn tick_haulables<'a>(&mut self, things: impl IntoIterator<Item = (&'a ThingId, &'a Thing)>) {
        let haulables = things
            .into_iter()
            .filter(|(id, thing)| {
                thing.haulable && !self.is_forbidden(id) && !self.in_storage(thing.cell)
            })
            .map(|(id, _)| id.clone())
            .collect();
        self.haulables = haulables;
    }

    /// Recount resources held in this faction's storage.
    pub fn tick_resource_counter<'a>(
        &mut self,
        things: impl IntoIterator<Item = (&'a ThingId, &'a Thing)>,
    ) {
        let mut counts = BTreeMap::new();
        for (_, thing) in things {
            if thing.haulable && self.in_storage(thing.cell) {
                *counts.entry(thing.def.clone()).or_insert(0) += thing.count;
            }
        }
        self.resource_counts = counts;
    }
}
