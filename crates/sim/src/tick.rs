//! Lockstep tick controller.
//!
//! A replica may only step while its clock is behind the horizon the authority
//! has released ("allowed until"). Each step binds the scope's id block, runs the
//! engine's single discrete step, executes every command scheduled for exactly
//! the tick being completed and then advances the clock by one. A replica held
//! at horizon `T` has not run tick `T` yet, so commands the authority issues for
//! `T` are still on time when the horizon moves past it.

use crate::dispatch::DispatchError;
use crate::hooks::{NoopHooks, SimulationHooks};
use crate::persist::{self, JsonReader, JsonWriter, PersistError};
use crate::queue::{CommandLog, ScopeQueue};
use crate::region::Region;
use crate::world::WorldState;
use colonysync_core::{Command, FactionId, IdAllocator, IdBlock, OwnerId, RegionId, Scope, SimTick};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Whether stepping is limited by an authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickGate {
    /// No authority; the gate is always open.
    Offline,
    /// Step only while the clock is below `allowed_until`.
    Following {
        /// Horizon released by the authority.
        allowed_until: SimTick,
    },
}

impl TickGate {
    /// Whether a clock at `tick` may take another step.
    pub fn allows(self, tick: SimTick) -> bool {
        match self {
            TickGate::Offline => true,
            TickGate::Following { allowed_until } => tick < allowed_until,
        }
    }

    /// The released horizon, if following an authority.
    pub fn horizon(self) -> Option<SimTick> {
        match self {
            TickGate::Offline => None,
            TickGate::Following { allowed_until } => Some(allowed_until),
        }
    }
}

/// Command results of one step or drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Commands that ran to completion.
    pub executed: usize,
    /// Commands that failed and were skipped.
    pub failed: usize,
    /// Commands found behind the clock and discarded.
    pub stale: usize,
}

impl StepReport {
    /// Add `other`'s counts into `self`.
    pub fn merge(&mut self, other: StepReport) {
        self.executed += other.executed;
        self.failed += other.failed;
        self.stale += other.stale;
    }
}

/// Result of asking the controller to step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The clock advanced by one.
    Stepped(StepReport),
    /// The gate is closed.
    Blocked,
}

/// What one frame did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    /// World steps taken.
    pub world_steps: u32,
    /// Region steps taken, summed over regions.
    pub region_steps: u32,
    /// Command results.
    pub commands: StepReport,
}

/// One replica of the shared simulation.
pub struct Simulation<H = NoopHooks> {
    pub(crate) world: WorldState,
    pub(crate) ids: IdAllocator,
    pub(crate) log: CommandLog,
    pub(crate) hooks: H,
    pub(crate) gate: TickGate,
    pub(crate) local_owner: OwnerId,
    pub(crate) last_save: Option<Value>,
}

impl<H: SimulationHooks> Simulation<H> {
    /// Wrap `world`, played locally by `local_owner`. Starts offline.
    pub fn new(world: WorldState, local_owner: OwnerId, hooks: H) -> Self {
        let log = CommandLog::new();
        for region in world.regions.values() {
            log.register_region(region.queue.clone());
        }
        let mut sim = Self {
            world,
            ids: IdAllocator::new(),
            log,
            hooks,
            gate: TickGate::Offline,
            local_owner,
            last_save: None,
        };
        sim.activate_local_faction();
        sim
    }

    /// Load a replica from world document bytes.
    pub fn from_document(bytes: &[u8], local_owner: OwnerId, hooks: H) -> Result<Self, PersistError> {
        let mut reader = JsonReader::from_slice(bytes)?;
        let world = persist::load_world(&mut reader)?;
        Ok(Self::new(world, local_owner, hooks))
    }

    /// Write the world document.
    pub fn save_document(&self) -> Result<Value, PersistError> {
        let mut writer = JsonWriter::new();
        persist::save_world(&mut writer, &self.world)?;
        Ok(writer.finish())
    }

    /// Replicated state.
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Extension hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Extension hooks, mutably.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// The id allocator.
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Participant this replica plays for.
    pub fn local_owner(&self) -> &OwnerId {
        &self.local_owner
    }

    /// Faction of the local participant, once set up.
    pub fn local_faction(&self) -> Option<&FactionId> {
        self.world.faction_of(&self.local_owner)
    }

    /// A handle producers use to enqueue commands from any thread.
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Route a command to its scope's queue.
    pub fn schedule(&self, command: Command) -> bool {
        self.log.enqueue(command)
    }

    /// Current gate.
    pub fn gate(&self) -> TickGate {
        self.gate
    }

    /// Follow an authority that released ticks below `tick`.
    pub fn set_allowed_until(&mut self, tick: SimTick) {
        self.gate = TickGate::Following { allowed_until: tick };
    }

    /// Stop following an authority.
    pub fn go_offline(&mut self) {
        self.gate = TickGate::Offline;
    }

    /// Whether the world clock may step.
    pub fn can_step(&self) -> bool {
        self.gate.allows(self.world.timer)
    }

    /// Add a region, routing its commands from now on.
    pub fn insert_region(&mut self, region: Region) -> Option<Region> {
        self.log.register_region(region.queue.clone());
        let id = region.id;
        let previous = self.world.regions.insert(id, region);
        if let (Some(faction), Some(region)) = (
            self.world.owner_factions.get(&self.local_owner).cloned(),
            self.world.regions.get_mut(&id),
        ) {
            region.set_active(&faction, true);
        }
        previous
    }

    /// Remove a region and stop routing its commands.
    pub fn remove_region(&mut self, id: RegionId) -> Option<Region> {
        self.log.unregister_region(id);
        self.world.regions.remove(&id)
    }

    /// Take the document written by the most recent autosave.
    pub fn take_autosave(&mut self) -> Option<Value> {
        self.last_save.take()
    }

    /// Point every region at the local participant's bundle where it has one.
    pub(crate) fn activate_local_faction(&mut self) {
        let Some(faction) = self.world.owner_factions.get(&self.local_owner).cloned() else {
            return;
        };
        for region in self.world.regions.values_mut() {
            region.set_active(&faction, true);
        }
    }

    /// Bind `scope`'s id block, returning whatever was bound to its owner.
    pub(crate) fn bind(&mut self, scope: Scope) {
        self.unbind();
        let block = match scope {
            Scope::Global => self.world.global_block.take(),
            Scope::Region(id) => self
                .world
                .regions
                .get_mut(&id)
                .and_then(|region| region.id_block.take()),
        };
        match block {
            Some(block) => {
                self.ids.set_current(scope, block);
            }
            None => debug!(%scope, "no id block to bind"),
        }
    }

    /// Unbind the current id block and hand it back with its advanced cursor.
    pub(crate) fn unbind(&mut self) {
        if let Some((scope, block)) = self.ids.clear_current() {
            self.return_block(scope, block);
        }
    }

    pub(crate) fn return_block(&mut self, scope: Scope, block: IdBlock) {
        match scope {
            Scope::Global => self.world.global_block = Some(block),
            Scope::Region(id) => match self.world.regions.get_mut(&id) {
                Some(region) => region.id_block = Some(block),
                None => warn!(region = %id, "id block returned for a region that is gone"),
            },
        }
    }

    fn run_command(&mut self, command: &Command, report: &mut StepReport) {
        match self.execute(command) {
            Ok(()) => report.executed += 1,
            Err(err) if err.is_desync() => {
                warn!(%command, error = %err, "skipping command");
                report.failed += 1;
            }
            Err(err) => {
                error!(%command, error = %err, "command failed");
                report.failed += 1;
            }
        }
    }

    fn drain_at(&mut self, queue: &ScopeQueue, tick: SimTick, report: &mut StepReport) {
        loop {
            match queue.pop_due(tick) {
                Ok(Some(command)) => self.run_command(&command, report),
                Ok(None) => break,
                Err(_) => report.stale += 1,
            }
        }
    }

    /// Advance the world by one tick if the gate allows it.
    pub fn step(&mut self) -> StepOutcome {
        if !self.can_step() {
            return StepOutcome::Blocked;
        }
        self.bind(Scope::Global);

        let tick = self.world.timer;
        if let Err(err) = self.hooks.on_tick(tick, &mut self.ids) {
            error!(%tick, error = %err, "world tick hook failed");
        }

        let mut report = StepReport::default();
        let queue = self.log.global().clone();
        self.drain_at(&queue, tick, &mut report);

        // A speed command may have re-based the clock; advance from there.
        self.world.timer = self.world.timer.advance(1);
        self.unbind();
        StepOutcome::Stepped(report)
    }

    /// While the world is paused, execute global commands due at the current tick.
    ///
    /// Stops as soon as a command lifts the pause.
    pub fn execute_global_while_paused(&mut self) -> StepReport {
        let mut report = StepReport::default();
        let queue = self.log.global().clone();
        if !self.world.speed.is_paused() || !queue.has_due(self.world.timer) {
            return report;
        }

        self.bind(Scope::Global);
        while self.world.speed.is_paused() {
            match queue.pop_due(self.world.timer) {
                Ok(Some(command)) => self.run_command(&command, &mut report),
                Ok(None) => break,
                Err(_) => report.stale += 1,
            }
        }
        self.unbind();
        report
    }

    /// Advance one region by one tick of its local clock if the gate allows it.
    pub fn step_region(&mut self, id: RegionId) -> Result<StepOutcome, DispatchError> {
        let region = self.world.regions.get(&id).ok_or(DispatchError::UnknownRegion(id))?;
        if !self.gate.allows(region.timer) {
            return Ok(StepOutcome::Blocked);
        }
        self.bind(Scope::Region(id));

        let Some(region) = self.world.regions.get_mut(&id) else {
            self.unbind();
            return Err(DispatchError::UnknownRegion(id));
        };
        region.tick_bundles();
        let tick = region.timer;
        if let Err(err) = self.hooks.on_region_tick(region, tick, &mut self.ids) {
            error!(region = %id, %tick, error = %err, "region tick hook failed");
        }
        let queue = region.queue.clone();

        let mut report = StepReport::default();
        self.drain_at(&queue, tick, &mut report);

        if let Some(region) = self.world.regions.get_mut(&id) {
            region.timer = region.timer.advance(1);
        }
        self.unbind();
        Ok(StepOutcome::Stepped(report))
    }

    /// Region counterpart of [`Simulation::execute_global_while_paused`].
    pub fn execute_region_while_paused(&mut self, id: RegionId) -> Result<StepReport, DispatchError> {
        let region = self.world.regions.get(&id).ok_or(DispatchError::UnknownRegion(id))?;
        let queue = region.queue.clone();
        let mut report = StepReport::default();
        if !region.speed.is_paused() || !queue.has_due(region.timer) {
            return Ok(report);
        }

        self.bind(Scope::Region(id));
        while let Some(region) = self.world.regions.get(&id) {
            if !region.speed.is_paused() {
                break;
            }
            match queue.pop_due(region.timer) {
                Ok(Some(command)) => self.run_command(&command, &mut report),
                Ok(None) => break,
                Err(_) => report.stale += 1,
            }
        }
        self.unbind();
        Ok(report)
    }

    /// One frame of the main loop: paused drains, then as many steps of the
    /// world and of each region as their speed multipliers at frame start ask
    /// for. A pause taking effect mid-frame ends that scope's steps.
    pub fn frame(&mut self) -> FrameReport {
        let mut frame = FrameReport::default();

        frame.commands.merge(self.execute_global_while_paused());
        let budget = self.world.speed.multiplier();
        while frame.world_steps < budget && !self.world.speed.is_paused() {
            match self.step() {
                StepOutcome::Stepped(report) => {
                    frame.world_steps += 1;
                    frame.commands.merge(report);
                }
                StepOutcome::Blocked => break,
            }
        }

        for id in self.world.region_ids() {
            if let Ok(report) = self.execute_region_while_paused(id) {
                frame.commands.merge(report);
            }
            let budget = self
                .world
                .regions
                .get(&id)
                .map_or(0, |region| region.speed.multiplier());
            let mut steps = 0;
            while steps < budget
                && self
                    .world
                    .regions
                    .get(&id)
                    .is_some_and(|region| !region.speed.is_paused())
            {
                match self.step_region(id) {
                    Ok(StepOutcome::Stepped(report)) => {
                        steps += 1;
                        frame.commands.merge(report);
                    }
                    Ok(StepOutcome::Blocked) | Err(_) => break,
                }
            }
            frame.region_steps += steps;
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::CommandBody;
    use crate::world::TimeSpeed;

    fn sim() -> Simulation {
        Simulation::new(
            WorldState::new().with_global_block(IdBlock::new(0, 100)),
            OwnerId::new("Alice"),
            NoopHooks,
        )
    }

    fn speed(tick: u64, speed: TimeSpeed) -> Command {
        CommandBody::WorldTimeSpeed(speed).into_command(SimTick(tick), Scope::Global)
    }

    #[test]
    fn gate_blocks_at_horizon() {
        let mut sim = sim();
        sim.set_allowed_until(SimTick(2));
        assert!(matches!(sim.step(), StepOutcome::Stepped(_)));
        assert!(matches!(sim.step(), StepOutcome::Stepped(_)));
        assert_eq!(sim.step(), StepOutcome::Blocked);
        assert_eq!(sim.world().timer(), SimTick(2));

        sim.go_offline();
        assert!(matches!(sim.step(), StepOutcome::Stepped(_)));
    }

    #[test]
    fn commands_execute_in_the_step_that_completes_their_tick() {
        let mut sim = sim();
        sim.schedule(speed(1, TimeSpeed::Fast));
        assert_eq!(sim.step(), StepOutcome::Stepped(StepReport::default()));
        assert_eq!(sim.world().timer(), SimTick(1));
        assert_eq!(sim.world().speed(), TimeSpeed::Normal);
        let StepOutcome::Stepped(report) = sim.step() else {
            panic!("gate should be open offline");
        };
        assert_eq!(report.executed, 1);
        assert_eq!(sim.world().speed(), TimeSpeed::Fast);
        assert_eq!(sim.world().timer(), SimTick(2));
    }

    #[test]
    fn command_at_the_horizon_arriving_late_still_runs() {
        let mut sim = sim();
        sim.set_allowed_until(SimTick(5));
        while sim.step() != StepOutcome::Blocked {}
        assert_eq!(sim.world().timer(), SimTick(5));

        sim.schedule(speed(5, TimeSpeed::Fast));
        sim.set_allowed_until(SimTick(6));
        assert_eq!(
            sim.step(),
            StepOutcome::Stepped(StepReport {
                executed: 1,
                failed: 0,
                stale: 0
            })
        );
        assert_eq!(sim.world().speed(), TimeSpeed::Fast);
        assert_eq!(sim.world().timer(), SimTick(6));
    }

    #[test]
    fn global_block_is_returned_after_each_step() {
        let mut sim = sim();
        sim.step();
        assert!(sim.world().global_block().is_some());
        assert!(sim.ids().bound_scope().is_none());
    }

    #[test]
    fn failing_command_does_not_abort_the_tick() {
        let mut sim = sim();
        sim.schedule(Command::global(
            colonysync_core::CommandKind::WorldTimeSpeed,
            SimTick(0),
            vec![42],
        ));
        sim.schedule(speed(0, TimeSpeed::Superfast));
        let StepOutcome::Stepped(report) = sim.step() else {
            panic!("gate should be open offline");
        };
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(sim.world().speed(), TimeSpeed::Superfast);
    }

    #[test]
    fn frame_runs_multiplier_steps() {
        let mut sim = sim();
        sim.schedule(speed(0, TimeSpeed::Ultrafast));
        let first = sim.frame();
        assert_eq!(first.world_steps, 1);
        let second = sim.frame();
        assert_eq!(second.world_steps, 15);
        assert_eq!(sim.world().timer(), SimTick(16));
    }
}
