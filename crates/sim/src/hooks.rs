//! Extension points the simulation calls into.

use crate::region::Region;
use anyhow::Result;
use colonysync_core::{Command, FactionId, IdAllocator, SimTick};
use serde_json::Value;

/// Gameplay logic driven by the lockstep controller.
///
/// Every method runs on the simulation thread at the same logical point on every
/// replica, so implementations must be deterministic. Ids drawn from `ids` come
/// from the block bound for the current scope.
pub trait SimulationHooks {
    /// One discrete world step at `tick`, before the clock advances.
    fn on_tick(&mut self, tick: SimTick, ids: &mut IdAllocator) -> Result<()> {
        let _ = (tick, ids);
        Ok(())
    }

    /// One discrete step of `region` at its local `tick`.
    fn on_region_tick(&mut self, region: &mut Region, tick: SimTick, ids: &mut IdAllocator) -> Result<()> {
        let _ = (region, tick, ids);
        Ok(())
    }

    /// A gameplay command (unit orders, spawns) for `faction`, with the faction's
    /// context pushed on `region`. `payload` is what follows the addressing
    /// fields the dispatcher already consumed.
    fn on_command(
        &mut self,
        region: &mut Region,
        faction: Option<&FactionId>,
        command: &Command,
        payload: &[u8],
        ids: &mut IdAllocator,
    ) -> Result<()> {
        let _ = (region, faction, command, payload, ids);
        Ok(())
    }

    /// An autosave document was written.
    fn on_save(&mut self, document: &Value) -> Result<()> {
        let _ = document;
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SimulationHooks for NoopHooks {}

impl<H: SimulationHooks + ?Sized> SimulationHooks for Box<H> {
    fn on_tick(&mut self, tick: SimTick, ids: &mut IdAllocator) -> Result<()> {
        (**self).on_tick(tick, ids)
    }

    fn on_region_tick(&mut self, region: &mut Region, tick: SimTick, ids: &mut IdAllocator) -> Result<()> {
        (**self).on_region_tick(region, tick, ids)
    }

    fn on_command(
        &mut self,
        region: &mut Region,
        faction: Option<&FactionId>,
        command: &Command,
        payload: &[u8],
        ids: &mut IdAllocator,
    ) -> Result<()> {
        (**self).on_command(region, faction, command, payload, ids)
    }

    fn on_save(&mut self, document: &Value) -> Result<()> {
        (**self).on_save(document)
    }
}
