//! Several replicas of one world fed the same command stream.

use crate::recording::RecordingHooks;
use crate::snapshot::{canonical_digest, first_difference};
use anyhow::{bail, Context, Result};
use colonysync_core::{Command, FactionId, IdBlock, OwnerId, RegionId, SimTick};
use colonysync_sim::persist::world_to_bytes;
use colonysync_sim::{
    FrameReport, RegionStateBundle, Simulation, SimulationHooks, Thing, ThingId, TimeSpeed,
    WorldState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Replicated state in a form that serializes identically on every replica.
///
/// Derived per-tick caches and the local participant's view are left out.
#[derive(Debug, Serialize)]
pub struct StateSnapshot<'a> {
    world_id: &'a str,
    timer: SimTick,
    speed: TimeSpeed,
    owner_factions: &'a BTreeMap<OwnerId, FactionId>,
    global_block: Option<&'a IdBlock>,
    regions: Vec<RegionSnapshot<'a>>,
}

#[derive(Debug, Serialize)]
struct RegionSnapshot<'a> {
    id: RegionId,
    parent: &'a FactionId,
    timer: SimTick,
    speed: TimeSpeed,
    id_block: Option<&'a IdBlock>,
    things: &'a BTreeMap<ThingId, Thing>,
    bundles: BTreeMap<&'a FactionId, &'a RegionStateBundle>,
}

impl<'a> StateSnapshot<'a> {
    /// Capture `world`.
    pub fn of(world: &'a WorldState) -> Self {
        Self {
            world_id: world.world_id(),
            timer: world.timer(),
            speed: world.speed(),
            owner_factions: world.owner_factions(),
            global_block: world.global_block(),
            regions: world
                .regions()
                .map(|region| RegionSnapshot {
                    id: region.id(),
                    parent: region.parent(),
                    timer: region.timer(),
                    speed: region.speed(),
                    id_block: region.id_block(),
                    things: region.things(),
                    bundles: region.bundles().collect(),
                })
                .collect(),
        }
    }
}

/// Blake3 digest of a replica's replicated state.
pub fn state_digest<H: SimulationHooks>(sim: &Simulation<H>) -> Result<String> {
    canonical_digest(&StateSnapshot::of(sim.world())).context("digest replica state")
}

/// A set of replicas loaded from the same world document.
pub struct ReplicaHarness {
    replicas: Vec<Simulation<RecordingHooks>>,
}

impl ReplicaHarness {
    /// One replica of `world` per participant in `owners`.
    pub fn new(world: &WorldState, owners: &[&str]) -> Result<Self> {
        let document = world_to_bytes(world).context("serialize seed world")?;
        let replicas = owners
            .iter()
            .map(|owner| {
                Simulation::from_document(&document, OwnerId::new(*owner), RecordingHooks::default())
                    .with_context(|| format!("load replica for {owner}"))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(replicas = replicas.len(), bytes = document.len(), "replica harness ready");
        Ok(Self { replicas })
    }

    /// Number of replicas.
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Whether the harness has no replicas.
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// All replicas.
    pub fn replicas(&self) -> &[Simulation<RecordingHooks>] {
        &self.replicas
    }

    /// One replica.
    pub fn replica(&self, index: usize) -> Option<&Simulation<RecordingHooks>> {
        self.replicas.get(index)
    }

    /// One replica, mutably.
    pub fn replica_mut(&mut self, index: usize) -> Option<&mut Simulation<RecordingHooks>> {
        self.replicas.get_mut(index)
    }

    /// Schedule `command` on every replica. Returns how many accepted it.
    pub fn broadcast(&self, command: &Command) -> usize {
        self.replicas
            .iter()
            .filter(|sim| sim.schedule(command.clone()))
            .count()
    }

    /// Release ticks below `tick` on every replica.
    pub fn release(&mut self, tick: SimTick) {
        for sim in &mut self.replicas {
            sim.set_allowed_until(tick);
        }
    }

    /// Run `frames` frames on every replica, returning per-replica totals.
    pub fn run_frames(&mut self, frames: usize) -> Vec<FrameReport> {
        self.replicas
            .iter_mut()
            .map(|sim| {
                let mut total = FrameReport::default();
                for _ in 0..frames {
                    let frame = sim.frame();
                    total.world_steps += frame.world_steps;
                    total.region_steps += frame.region_steps;
                    total.commands.merge(frame.commands);
                }
                total
            })
            .collect()
    }

    /// State digest of every replica, in order.
    pub fn digests(&self) -> Result<Vec<String>> {
        self.replicas.iter().map(state_digest).collect()
    }

    /// Fail unless every replica has the same state digest; returns it.
    pub fn assert_converged(&self) -> Result<String> {
        let digests = self.digests()?;
        let Some(first) = digests.first() else {
            bail!("no replicas to compare");
        };
        for (index, digest) in digests.iter().enumerate().skip(1) {
            if digest != first {
                let path = first_difference(
                    &StateSnapshot::of(self.replicas[0].world()),
                    &StateSnapshot::of(self.replicas[index].world()),
                )?
                .unwrap_or_default();
                warn!(index, %digest, expected = %first, %path, "replica diverged");
                bail!("replica {index} diverged at {path:?}: {digest} != {first}");
            }
        }
        Ok(first.clone())
    }
}
