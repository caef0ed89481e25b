//! Identity and join-target resolution plus the offline run loop.

use anyhow::{bail, Context, Result};
use colonysync_core::{IdBlock, OwnerId, Scope, SimTick};
use colonysync_sim::persist::world_to_bytes;
use colonysync_sim::{CommandBody, FrameReport, NoopHooks, Simulation, WorldState};
use rand::Rng;
use serde::Serialize;
use std::fs;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use tracing::{info, warn};

/// Join target used by a bare `--connect`.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Global id range of an offline world.
const OFFLINE_ID_START: i32 = 1;
const OFFLINE_ID_COUNT: i32 = 1_000_000;

/// Flag, then config, then a random `Player<NNNN>`.
pub fn resolve_identity(flag: Option<&str>, configured: Option<&str>) -> OwnerId {
    let chosen = [flag, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty());
    match chosen {
        Some(name) => OwnerId::new(name),
        None => OwnerId::new(format!(
            "Player{:04}",
            rand::thread_rng().gen_range(0..10_000)
        )),
    }
}

/// Parse `host[:port]`, filling in `default_port`.
pub fn resolve_target(target: &str, default_port: u16) -> Result<SocketAddr> {
    let target = target.trim();
    if target.is_empty() {
        bail!("empty join target");
    }
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    let with_port = if target.contains(':') {
        target.to_string()
    } else {
        format!("{}:{}", target, default_port)
    };
    with_port
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", with_port))?
        .next()
        .with_context(|| format!("{} resolved to no addresses", with_port))
}

/// Totals of an offline run.
#[derive(Debug, Clone, Serialize)]
pub struct OfflineSummary {
    pub identity: String,
    pub final_tick: u64,
    pub frames: u64,
    pub totals: FrameReport,
}

/// Run a local world for `ticks` world ticks with no authority.
pub fn run_offline(identity: &OwnerId, ticks: u64, save: Option<&Path>) -> Result<OfflineSummary> {
    let world = WorldState::new().with_global_block(IdBlock::new(OFFLINE_ID_START, OFFLINE_ID_COUNT));
    let mut sim = Simulation::new(world, identity.clone(), NoopHooks);
    sim.schedule(
        CommandBody::SetupFaction {
            owner: identity.clone(),
        }
        .into_command(SimTick(1), Scope::Global),
    );

    let target = SimTick(ticks);
    let mut totals = FrameReport::default();
    let mut frames = 0;
    while sim.world().timer() < target {
        let frame = sim.frame();
        frames += 1;
        totals.world_steps += frame.world_steps;
        totals.region_steps += frame.region_steps;
        totals.commands.merge(frame.commands);
        if frame.world_steps == 0 {
            warn!(tick = %sim.world().timer(), "World stopped advancing");
            break;
        }
    }
    info!(
        tick = %sim.world().timer(),
        faction = ?sim.local_faction(),
        "Offline run finished"
    );

    if let Some(path) = save {
        let bytes = world_to_bytes(sim.world()).context("Failed to write world document")?;
        fs::write(path, bytes).with_context(|| format!("Failed to save {}", path.display()))?;
        info!("World saved to {}", path.display());
    }

    Ok(OfflineSummary {
        identity: identity.as_str().to_string(),
        final_tick: sim.world().timer().0,
        frames,
        totals,
    })
}
