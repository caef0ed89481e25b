//! Independently ticking sub-areas of the world.

use crate::bundle::{Cell, RegionNotice, RegionStateBundle, Thing, ThingId};
use crate::owner::OwnerContextStack;
use crate::queue::ScopeQueue;
use crate::TimeSpeed;
use colonysync_core::{FactionId, IdBlock, RegionId, Scope, SimTick};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Default number of cells in a region (a 250 x 250 map).
pub const DEFAULT_REGION_CELLS: Cell = 250 * 250;

/// A region: shared things plus one private state bundle per faction.
#[derive(Debug)]
pub struct Region {
    pub(crate) id: RegionId,
    pub(crate) parent: FactionId,
    pub(crate) primary_home: bool,
    pub(crate) cells: Cell,
    pub(crate) timer: SimTick,
    pub(crate) speed: TimeSpeed,
    pub(crate) id_block: Option<IdBlock>,
    pub(crate) queue: ScopeQueue,
    pub(crate) bundles: BTreeMap<FactionId, RegionStateBundle>,
    pub(crate) active: Option<FactionId>,
    pub(crate) context: OwnerContextStack,
    pub(crate) things: BTreeMap<ThingId, Thing>,
    pub(crate) notices: Vec<RegionNotice>,
}

impl Region {
    /// New region settled by `parent`, whose bundle is bootstrapped and active.
    pub fn new(id: RegionId, parent: FactionId, primary_home: bool) -> Self {
        let mut bundles = BTreeMap::new();
        bundles.insert(parent.clone(), RegionStateBundle::bootstrap());
        Self {
            id,
            active: Some(parent.clone()),
            parent,
            primary_home,
            cells: DEFAULT_REGION_CELLS,
            timer: SimTick::ZERO,
            speed: TimeSpeed::Normal,
            id_block: None,
            queue: ScopeQueue::new(Scope::Region(id)),
            bundles,
            context: OwnerContextStack::default(),
            things: BTreeMap::new(),
            notices: Vec::new(),
        }
    }

    /// Builder: region clock.
    pub fn with_timer(mut self, timer: SimTick) -> Self {
        self.timer = timer;
        self
    }

    /// Builder: region id block.
    pub fn with_id_block(mut self, block: IdBlock) -> Self {
        self.id_block = Some(block);
        self
    }

    /// Builder: number of cells.
    pub fn with_cells(mut self, cells: Cell) -> Self {
        self.cells = cells.max(1);
        self
    }

    /// Region id.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Faction that settled the region.
    pub fn parent(&self) -> &FactionId {
        &self.parent
    }

    /// Whether the region is its parent's primary home.
    pub fn is_primary_home(&self) -> bool {
        self.primary_home
    }

    /// Local clock.
    pub fn timer(&self) -> SimTick {
        self.timer
    }

    /// Local time speed.
    pub fn speed(&self) -> TimeSpeed {
        self.speed
    }

    /// Stored id block; `None` while it is bound to the allocator.
    pub fn id_block(&self) -> Option<&IdBlock> {
        self.id_block.as_ref()
    }

    /// Handle to the region's command queue.
    pub fn queue(&self) -> &ScopeQueue {
        &self.queue
    }

    /// Whether `cell` lies inside the region.
    pub fn contains_cell(&self, cell: Cell) -> bool {
        (0..self.cells).contains(&cell)
    }

    /// The central cell, where new units arrive.
    pub fn center_cell(&self) -> Cell {
        self.cells / 2
    }

    /// Faction whose bundle is currently active.
    pub fn active_faction(&self) -> Option<&FactionId> {
        self.active.as_ref()
    }

    /// The active bundle.
    pub fn active_bundle(&self) -> Option<&RegionStateBundle> {
        self.active.as_ref().and_then(|id| self.bundles.get(id))
    }

    /// The active bundle, mutably.
    pub fn active_bundle_mut(&mut self) -> Option<&mut RegionStateBundle> {
        match &self.active {
            Some(id) => self.bundles.get_mut(id),
            None => None,
        }
    }

    /// Bundle of a specific faction.
    pub fn bundle(&self, faction: &FactionId) -> Option<&RegionStateBundle> {
        self.bundles.get(faction)
    }

    /// All bundles in faction order.
    pub fn bundles(&self) -> impl Iterator<Item = (&FactionId, &RegionStateBundle)> {
        self.bundles.iter()
    }

    /// Create `faction`'s bundle if this is its first activity here.
    ///
    /// Returns whether a bundle was created.
    pub fn ensure_bundle(&mut self, faction: &FactionId) -> bool {
        if self.bundles.contains_key(faction) {
            return false;
        }
        self.bundles
            .insert(faction.clone(), RegionStateBundle::bootstrap());
        info!(region = %self.id, %faction, "bootstrapped region state for faction");
        true
    }

    /// Point the region at `faction`'s bundle.
    ///
    /// Factions without a bundle leave the active bundle as it is; unless
    /// `silent`, that is logged.
    pub fn set_active(&mut self, faction: &FactionId, silent: bool) -> bool {
        if !self.bundles.contains_key(faction) {
            if !silent {
                info!(region = %self.id, %faction, "no region state for faction");
            }
            return false;
        }
        self.active = Some(faction.clone());
        true
    }

    /// Things on the region.
    pub fn things(&self) -> &BTreeMap<ThingId, Thing> {
        &self.things
    }

    /// A thing by id.
    pub fn thing(&self, id: &ThingId) -> Option<&Thing> {
        self.things.get(id)
    }

    /// Place a thing on the region, replacing one with the same id.
    pub fn insert_thing(&mut self, id: ThingId, thing: Thing) {
        debug!(region = %self.id, thing = %id, def = %thing.def, "thing placed");
        self.things.insert(id, thing);
    }

    /// Remove a thing.
    pub fn remove_thing(&mut self, id: &ThingId) -> Option<Thing> {
        self.things.remove(id)
    }

    /// Add a user-created area to the active bundle, reporting it.
    pub fn add_user_area(&mut self, area: &str) -> bool {
        let faction = self.active.clone();
        let Some(bundle) = self.active_bundle_mut() else {
            return false;
        };
        if !bundle.insert_area(area, true) {
            return false;
        }
        self.notices.push(RegionNotice::AreaAdded {
            faction,
            area: area.to_string(),
        });
        true
    }

    /// Take the notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<RegionNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Tick every faction's haulables and resource counter under that faction's
    /// context, in faction order.
    pub(crate) fn tick_bundles(&mut self) {
        let factions: Vec<FactionId> = self.bundles.keys().cloned().collect();
        for faction in factions {
            let mut scope = self.with_owner(crate::owner::Party::Player(faction));
            let Region {
                things,
                bundles,
                active,
                ..
            } = &mut *scope;
            if let Some(bundle) = active.as_ref().and_then(|id| bundles.get_mut(id)) {
                bundle.tick_haulables(things.iter());
                bundle.tick_resource_counter(things.iter());
            }
        }
    }
}
