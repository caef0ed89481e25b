//! Fast-forwarding a replica that is behind the authority.
//!
//! The driver runs bounded batches of steps so the caller can report progress
//! and stay responsive between batches. It finishes when the clock reaches the
//! horizon, or early when the world is paused with nothing left to drain. Either
//! way the completion signal fires exactly once.

use crate::dispatch::DispatchError;
use crate::hooks::SimulationHooks;
use crate::owner::Party;
use crate::tick::{Simulation, StepOutcome};
use colonysync_core::{RegionId, SimTick};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Default number of ticks per batch.
pub const DEFAULT_BATCH_TICKS: u64 = 100;

/// Default pause between batches.
pub const DEFAULT_BATCH_YIELD: Duration = Duration::from_millis(50);

/// Batch sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpConfig {
    /// Ticks simulated per batch at most.
    pub batch_ticks: u64,
    /// Pause between batches.
    pub batch_yield: Duration,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            batch_ticks: DEFAULT_BATCH_TICKS,
            batch_yield: DEFAULT_BATCH_YIELD,
        }
    }
}

/// How catch-up ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CatchUpOutcome {
    /// The clock reached the horizon.
    Complete,
    /// The world is paused and nothing is due; the clock stays where it is.
    Stalled,
}

/// Result of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// More batches may be needed. `percent` is progress after this batch.
    Continue {
        /// Progress from 0 to 100.
        percent: u8,
    },
    /// Finished; the completion signal has fired.
    Done(CatchUpOutcome),
}

/// The completion signal was dropped without firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("catch-up driver dropped before completing")]
pub struct CatchUpAbandoned;

/// Receiving end of the completion signal.
#[derive(Debug)]
pub struct CatchUpHandle {
    rx: oneshot::Receiver<CatchUpOutcome>,
}

impl CatchUpHandle {
    /// Block the calling thread until catch-up finishes.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> Result<CatchUpOutcome, CatchUpAbandoned> {
        self.rx.blocking_recv().map_err(|_| CatchUpAbandoned)
    }

    /// Wait asynchronously until catch-up finishes.
    pub async fn finished(self) -> Result<CatchUpOutcome, CatchUpAbandoned> {
        self.rx.await.map_err(|_| CatchUpAbandoned)
    }

    /// Non-blocking check.
    pub fn try_outcome(&mut self) -> Option<CatchUpOutcome> {
        self.rx.try_recv().ok()
    }
}

/// Batched fast-forward of the world clock.
#[derive(Debug)]
pub struct CatchUpDriver {
    start: SimTick,
    config: CatchUpConfig,
    signal: Option<oneshot::Sender<CatchUpOutcome>>,
}

impl CatchUpDriver {
    /// Begin catching `sim` up from its current tick.
    pub fn start<H: SimulationHooks>(sim: &Simulation<H>, config: CatchUpConfig) -> (Self, CatchUpHandle) {
        let (tx, rx) = oneshot::channel();
        let start = sim.world().timer();
        info!(
            %start,
            horizon = ?sim.gate().horizon(),
            speed = ?sim.world().speed(),
            "catch-up start"
        );
        (
            Self {
                start,
                config: CatchUpConfig {
                    batch_ticks: config.batch_ticks.max(1),
                    ..config
                },
                signal: Some(tx),
            },
            CatchUpHandle { rx },
        )
    }

    /// Batch sizing in use.
    pub fn config(&self) -> CatchUpConfig {
        self.config
    }

    /// Whether the completion signal has fired.
    pub fn is_finished(&self) -> bool {
        self.signal.is_none()
    }

    /// Progress from the start tick to the horizon, 0 to 100.
    pub fn progress<H: SimulationHooks>(&self, sim: &Simulation<H>) -> u8 {
        let Some(horizon) = sim.gate().horizon() else {
            return 100;
        };
        let total = self.start.ticks_until(horizon);
        if total == 0 {
            return 100;
        }
        let done = self.start.ticks_until(sim.world().timer()).min(total);
        (done * 100 / total) as u8
    }

    fn finish(&mut self, outcome: CatchUpOutcome) -> BatchOutcome {
        if let Some(tx) = self.signal.take() {
            info!(?outcome, "catch-up finished");
            // The waiter may have gone away; nothing to do then.
            let _ = tx.send(outcome);
        }
        BatchOutcome::Done(outcome)
    }

    /// Simulate at most one batch.
    pub fn run_batch<H: SimulationHooks>(&mut self, sim: &mut Simulation<H>) -> BatchOutcome {
        let remaining = match sim.gate().horizon() {
            Some(horizon) => sim.world().timer().ticks_until(horizon),
            None => 0,
        };
        if remaining == 0 {
            return self.finish(CatchUpOutcome::Complete);
        }

        let batch = remaining.min(self.config.batch_ticks);
        debug!(percent = self.progress(sim), batch, "catch-up batch");

        let batch_start = sim.world().timer();
        let batch_end = batch_start.advance(batch);
        while sim.world().timer() < batch_end {
            if !sim.world().speed().is_paused() {
                if sim.step() == StepOutcome::Blocked {
                    warn!(timer = %sim.world().timer(), "gate closed during catch-up");
                    return self.finish(CatchUpOutcome::Stalled);
                }
            } else if sim.log.global().has_due(sim.world().timer()) {
                sim.execute_global_while_paused();
            } else {
                return self.finish(CatchUpOutcome::Stalled);
            }
        }
        BatchOutcome::Continue {
            percent: self.progress(sim),
        }
    }

    /// Run batches to the end, sleeping between them.
    pub fn run<H: SimulationHooks>(mut self, sim: &mut Simulation<H>) -> CatchUpOutcome {
        loop {
            match self.run_batch(sim) {
                BatchOutcome::Done(outcome) => return outcome,
                BatchOutcome::Continue { .. } => std::thread::sleep(self.config.batch_yield),
            }
        }
    }
}

impl Drop for CatchUpDriver {
    fn drop(&mut self) {
        if self.signal.is_some() {
            debug!("catch-up driver dropped before finishing");
        }
    }
}

/// Fast-forward one freshly received region to the world horizon under its
/// parent faction's context, then point it at the local participant's bundle.
pub fn catch_up_region<H: SimulationHooks>(
    sim: &mut Simulation<H>,
    id: RegionId,
) -> Result<CatchUpOutcome, DispatchError> {
    let region = sim
        .world
        .regions
        .get_mut(&id)
        .ok_or(DispatchError::UnknownRegion(id))?;
    let Some(horizon) = sim.gate.horizon() else {
        return Ok(CatchUpOutcome::Complete);
    };
    info!(region = %id, start = %region.timer, %horizon, "region catch-up start");
    let parent = region.parent.clone();
    region.push(Party::Player(parent));

    let outcome = loop {
        let Some(region) = sim.world.regions.get(&id) else {
            break CatchUpOutcome::Stalled;
        };
        if region.timer >= horizon {
            break CatchUpOutcome::Complete;
        }
        if !region.speed.is_paused() {
            if !matches!(sim.step_region(id), Ok(StepOutcome::Stepped(_))) {
                break CatchUpOutcome::Stalled;
            }
        } else if region.queue.has_due(region.timer) {
            if sim.execute_region_while_paused(id).is_err() {
                break CatchUpOutcome::Stalled;
            }
        } else {
            break CatchUpOutcome::Stalled;
        }
    };

    if let Some(region) = sim.world.regions.get_mut(&id) {
        region.pop();
        if let Some(local) = sim.world.owner_factions.get(&sim.local_owner) {
            region.set_active(local, false);
        }
    }
    info!(region = %id, ?outcome, "region catch-up finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use crate::payload::CommandBody;
    use crate::world::{TimeSpeed, WorldState};
    use colonysync_core::{IdBlock, OwnerId, Scope};

    fn sim_with_horizon(horizon: u64) -> Simulation {
        let mut sim = Simulation::new(
            WorldState::new().with_global_block(IdBlock::new(0, 10)),
            OwnerId::new("Alice"),
            NoopHooks,
        );
        sim.set_allowed_until(SimTick(horizon));
        sim
    }

    #[test]
    fn reaches_horizon_in_batches() {
        let mut sim = sim_with_horizon(250);
        let (mut driver, mut handle) = CatchUpDriver::start(&sim, CatchUpConfig::default());

        assert_eq!(driver.progress(&sim), 0);
        assert_eq!(driver.run_batch(&mut sim), BatchOutcome::Continue { percent: 40 });
        assert_eq!(sim.world().timer(), SimTick(100));
        assert_eq!(driver.run_batch(&mut sim), BatchOutcome::Continue { percent: 80 });
        assert_eq!(driver.run_batch(&mut sim), BatchOutcome::Continue { percent: 100 });
        assert_eq!(sim.world().timer(), SimTick(250));
        assert!(handle.try_outcome().is_none());

        assert_eq!(
            driver.run_batch(&mut sim),
            BatchOutcome::Done(CatchUpOutcome::Complete)
        );
        assert_eq!(handle.try_outcome(), Some(CatchUpOutcome::Complete));
        assert_eq!(
            driver.run_batch(&mut sim),
            BatchOutcome::Done(CatchUpOutcome::Complete)
        );
        assert!(driver.is_finished());
    }

    #[test]
    fn paused_world_stalls_after_draining() {
        let mut sim = sim_with_horizon(50);
        sim.schedule(CommandBody::WorldTimeSpeed(TimeSpeed::Paused).into_command(SimTick(10), Scope::Global));
        let (driver, handle) = CatchUpDriver::start(&sim, CatchUpConfig::default());

        assert_eq!(driver.run(&mut sim), CatchUpOutcome::Stalled);
        // The pausing tick itself completes.
        assert_eq!(sim.world().timer(), SimTick(11));
        assert_eq!(handle.wait(), Ok(CatchUpOutcome::Stalled));
    }

    #[test]
    fn offline_replica_is_already_caught_up() {
        let mut sim = sim_with_horizon(0);
        sim.go_offline();
        let (driver, handle) = CatchUpDriver::start(&sim, CatchUpConfig::default());
        assert_eq!(driver.run(&mut sim), CatchUpOutcome::Complete);
        assert_eq!(handle.wait(), Ok(CatchUpOutcome::Complete));
    }

    #[tokio::test]
    async fn handle_resolves_asynchronously() {
        let mut sim = sim_with_horizon(5);
        let (driver, handle) = CatchUpDriver::start(&sim, CatchUpConfig::default());
        let outcome = driver.run(&mut sim);
        assert_eq!(handle.finished().await, Ok(outcome));
    }

    #[test]
    fn dropped_driver_abandons_the_handle() {
        let sim = sim_with_horizon(5);
        let (driver, handle) = CatchUpDriver::start(&sim, CatchUpConfig::default());
        drop(driver);
        assert_eq!(handle.wait(), Err(CatchUpAbandoned));
    }
}
