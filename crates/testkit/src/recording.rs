//! Hooks that record what the controller asked of them.

use crate::snapshot::canonical_digest;
use crate::EventRecord;
use anyhow::{bail, Result};
use colonysync_core::{Command, CommandKind, FactionId, IdAllocator, SimTick};
use colonysync_sim::{Region, SimulationHooks};
use serde_json::Value;

/// [`SimulationHooks`] that log every command and save they see.
///
/// Ticks are counted rather than recorded one by one. A kind registered with
/// [`RecordingHooks::failing_on`] makes `on_command` return an error, for tests
/// that check a failing handler does not stop the tick.
#[derive(Debug, Default, Clone)]
pub struct RecordingHooks {
    events: Vec<EventRecord>,
    world_ticks: u64,
    region_ticks: u64,
    spawned: Vec<i32>,
    fail_on: Option<CommandKind>,
}

impl RecordingHooks {
    /// Hooks that fail every `kind` command.
    pub fn failing_on(kind: CommandKind) -> Self {
        Self {
            fail_on: Some(kind),
            ..Self::default()
        }
    }

    /// Events in the order they happened.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Drain the recorded events.
    pub fn take_events(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.events)
    }

    /// World steps seen.
    pub fn world_ticks(&self) -> u64 {
        self.world_ticks
    }

    /// Region steps seen, summed over regions.
    pub fn region_ticks(&self) -> u64 {
        self.region_ticks
    }

    /// Ids drawn for spawned units, in order.
    pub fn spawned_ids(&self) -> &[i32] {
        &self.spawned
    }
}

impl SimulationHooks for RecordingHooks {
    fn on_tick(&mut self, _tick: SimTick, _ids: &mut IdAllocator) -> Result<()> {
        self.world_ticks += 1;
        Ok(())
    }

    fn on_region_tick(&mut self, _region: &mut Region, _tick: SimTick, _ids: &mut IdAllocator) -> Result<()> {
        self.region_ticks += 1;
        Ok(())
    }

    fn on_command(
        &mut self,
        region: &mut Region,
        faction: Option<&FactionId>,
        command: &Command,
        payload: &[u8],
        ids: &mut IdAllocator,
    ) -> Result<()> {
        if self.fail_on == Some(command.kind()) {
            bail!("{} rejected by test hooks", command.kind());
        }
        if command.kind() == CommandKind::SpawnPawn {
            self.spawned.push(ids.next()?);
        }
        self.events.push(EventRecord {
            tick: command.target_tick(),
            kind: command.kind().to_string(),
            detail: format!(
                "{} {} {}b",
                region.id(),
                faction.map_or("-", FactionId::as_str),
                payload.len()
            ),
        });
        Ok(())
    }

    fn on_save(&mut self, document: &Value) -> Result<()> {
        let timer = document
            .pointer("/world/timer")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        self.events.push(EventRecord {
            tick: SimTick(timer),
            kind: "save".into(),
            detail: canonical_digest(document)?,
        });
        Ok(())
    }
}
