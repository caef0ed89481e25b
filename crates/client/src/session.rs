//! Participant session: connection state, packet handlers and the join flow.
//!
//! Everything here runs on the simulation thread. Other threads reach the
//! session through [`DeferredSender`] and the thread-safe scope queues.

use crate::deferred::{DeferredQueue, DeferredSender};
use anyhow::{bail, Context, Result};
use colonysync_core::{OwnerId, SimTick};
use colonysync_net::{
    encode_packet, AutosavedData, CommandPacket, DisconnectReason, EncounterRequest, Notification,
    Packet, PacketRouter, PacketTag, PlayerList, RegionLoaded, RegionResponse, RequestWorld,
    TimeControl, Transport, Username, WorldData, WorldLoaded,
};
use colonysync_sim::persist::region_from_bytes;
use colonysync_sim::{
    catch_up_region, BatchOutcome, CatchUpConfig, CatchUpDriver, CatchUpHandle, CatchUpOutcome,
    FrameReport, Simulation, SimulationHooks,
};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Packets handled per frame at most.
pub const MAX_PACKETS_PER_FRAME: usize = 256;

/// Where the session is in its life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Transport open, nothing sent yet.
    Connecting,
    /// World requested, or received and catching up.
    LoadingWorld,
    /// Caught up and following the authority.
    Playing,
    /// The connection ended.
    Disconnected {
        /// Reason given by the authority or the transport.
        reason: String,
    },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::LoadingWorld => f.write_str("loading world"),
            SessionState::Playing => f.write_str("playing"),
            SessionState::Disconnected { reason } => write!(f, "disconnected ({})", reason),
        }
    }
}

/// What one session frame did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionFrame {
    /// Deferred actions run.
    pub deferred: usize,
    /// Packets handled.
    pub packets: usize,
    /// Packets whose handler failed.
    pub rejected: usize,
    /// Simulation frame, when playing.
    pub sim: Option<FrameReport>,
}

/// Mutable state the packet handlers work on.
pub struct SessionContext<H: SimulationHooks> {
    identity: OwnerId,
    state: SessionState,
    sim: Option<Simulation<H>>,
    hooks: Option<H>,
    catch_up: CatchUpConfig,
    joining: Option<CatchUpDriver>,
    join_signal: Option<CatchUpHandle>,
    join_outcome: Option<CatchUpOutcome>,
    players: Vec<String>,
    notifications: Vec<String>,
    outbox: Vec<(PacketTag, Vec<u8>)>,
}

impl<H: SimulationHooks> SessionContext<H> {
    /// Local participant.
    pub fn identity(&self) -> &OwnerId {
        &self.identity
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The replica, once the world has been received.
    pub fn sim(&self) -> Option<&Simulation<H>> {
        self.sim.as_ref()
    }

    /// Mutable replica access.
    pub fn sim_mut(&mut self) -> Option<&mut Simulation<H>> {
        self.sim.as_mut()
    }

    /// Participants from the latest player list.
    pub fn players(&self) -> &[String] {
        &self.players
    }

    /// Notifications received so far.
    pub fn notifications(&self) -> &[String] {
        &self.notifications
    }

    /// How the world join ended, once it has.
    pub fn join_outcome(&self) -> Option<CatchUpOutcome> {
        self.join_outcome
    }

    /// Whether a world join is waiting on its completion signal.
    pub fn join_pending(&self) -> bool {
        self.join_signal.is_some()
    }

    /// Queue a packet for the authority; flushed at the end of the frame.
    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<()> {
        let payload = encode_packet(packet)?;
        self.outbox.push((P::TAG, payload));
        Ok(())
    }

    fn disconnect(&mut self, reason: impl Into<String>) {
        if matches!(self.state, SessionState::Disconnected { .. }) {
            return;
        }
        let reason = reason.into();
        info!(%reason, "Session disconnected");
        self.state = SessionState::Disconnected { reason };
        self.joining = None;
        self.join_signal = None;
    }

    fn sim_or_bail(&mut self, what: &str) -> Result<&mut Simulation<H>> {
        match self.sim.as_mut() {
            Some(sim) => Ok(sim),
            None => bail!("{} before the world was loaded", what),
        }
    }

    fn on_world_data(&mut self, packet: WorldData) -> Result<()> {
        if self.state != SessionState::LoadingWorld {
            bail!("world data while {}", self.state);
        }
        let hooks = self
            .hooks
            .take()
            .context("world data received twice")?;
        let mut sim = Simulation::from_document(&packet.world, self.identity.clone(), hooks)
            .context("Failed to load world document")?;
        let horizon = SimTick::from_wire(packet.tick_until).context("negative horizon")?;
        sim.set_allowed_until(horizon);

        let count = packet.commands.len();
        for record in packet.commands {
            if !sim.schedule(record.0) {
                debug!("pending command addressed an unknown region");
            }
        }
        info!(
            timer = %sim.world().timer(),
            %horizon,
            commands = count,
            "World received, catching up"
        );

        let (driver, signal) = CatchUpDriver::start(&sim, self.catch_up);
        self.joining = Some(driver);
        self.join_signal = Some(signal);
        self.sim = Some(sim);
        Ok(())
    }

    fn on_region_response(&mut self, packet: RegionResponse) -> Result<()> {
        let region = region_from_bytes(&packet.region).context("Failed to load region document")?;
        let id = region.id();
        let sim = self.sim_or_bail("region response")?;
        sim.insert_region(region);
        for record in packet.commands {
            sim.schedule(record.0);
        }
        let outcome = catch_up_region(sim, id)?;
        info!(region = %id, ?outcome, "Region loaded");
        self.send(&RegionLoaded)
    }

    fn on_time_control(&mut self, packet: TimeControl) -> Result<()> {
        let horizon = SimTick::from_wire(packet.tick_until).context("negative horizon")?;
        self.sim_or_bail("time control")?.set_allowed_until(horizon);
        Ok(())
    }

    fn on_command(&mut self, packet: CommandPacket) -> Result<()> {
        let command = packet.command.0;
        let kind = command.kind();
        if !self.sim_or_bail("command")?.schedule(command) {
            warn!(?kind, "command for an unknown region dropped");
        }
        Ok(())
    }

    /// Run one batch of the world join, then check its completion signal.
    /// Returns true when the join just finished.
    fn advance_join(&mut self) -> Result<bool> {
        if let (Some(driver), Some(sim)) = (self.joining.as_mut(), self.sim.as_mut()) {
            match driver.run_batch(sim) {
                BatchOutcome::Continue { percent } => debug!(percent, "Catching up"),
                BatchOutcome::Done(_) => self.joining = None,
            }
        }

        let Some(signal) = self.join_signal.as_mut() else {
            return Ok(false);
        };
        let Some(outcome) = signal.try_outcome() else {
            if self.joining.is_none() {
                self.join_signal = None;
                bail!("catch-up ended without signalling completion");
            }
            return Ok(false);
        };
        self.join_signal = None;
        self.join_outcome = Some(outcome);
        self.state = SessionState::Playing;
        self.send(&WorldLoaded)?;
        Ok(true)
    }

    fn take_autosave(&mut self) -> Result<()> {
        let Some(document) = self.sim.as_mut().and_then(|sim| sim.take_autosave()) else {
            return Ok(());
        };
        let data = serde_json::to_vec(&document).context("Failed to encode autosave")?;
        debug!(bytes = data.len(), "Sending autosave");
        self.send(&AutosavedData {
            is_world: true,
            data,
        })
    }
}

fn handlers<H: SimulationHooks + 'static>() -> PacketRouter<SessionContext<H>> {
    let mut router = PacketRouter::<SessionContext<H>>::new();
    router.on::<WorldData, _>(|context, packet| context.on_world_data(packet));
    router.on::<RegionResponse, _>(|context, packet| context.on_region_response(packet));
    router.on::<TimeControl, _>(|context, packet| context.on_time_control(packet));
    router.on::<CommandPacket, _>(|context, packet| context.on_command(packet));
    router.on::<PlayerList, _>(|context, packet| {
        debug!(players = packet.players.len(), "Player list");
        context.players = packet.players;
        Ok(())
    });
    router.on::<Notification, _>(|context, packet| {
        info!(text = %packet.text, "Notification");
        context.notifications.push(packet.text);
        Ok(())
    });
    router.on::<DisconnectReason, _>(|context, packet| {
        context.disconnect(packet.reason);
        Ok(())
    });
    router
}

/// One participant's connection to the authority.
pub struct Session<T: Transport, H: SimulationHooks + 'static> {
    transport: T,
    router: PacketRouter<SessionContext<H>>,
    context: SessionContext<H>,
    deferred: DeferredQueue<SessionContext<H>>,
}

impl<T: Transport, H: SimulationHooks + 'static> Session<T, H> {
    /// Wrap an open transport. `hooks` drive the replica once the world arrives.
    pub fn new(transport: T, identity: OwnerId, hooks: H, catch_up: CatchUpConfig) -> Self {
        Self {
            transport,
            router: handlers(),
            context: SessionContext {
                identity,
                state: SessionState::Connecting,
                sim: None,
                hooks: Some(hooks),
                catch_up,
                joining: None,
                join_signal: None,
                join_outcome: None,
                players: Vec::new(),
                notifications: Vec::new(),
                outbox: Vec::new(),
            },
            deferred: DeferredQueue::new(),
        }
    }

    /// Introduce ourselves and ask for the world.
    pub fn join(&mut self) -> Result<()> {
        if self.context.state != SessionState::Connecting {
            bail!("join while {}", self.context.state);
        }
        info!(identity = %self.context.identity, "Joining");
        let name = self.context.identity.as_str().to_string();
        self.context.send(&Username { name })?;
        self.context.send(&RequestWorld)?;
        self.context.state = SessionState::LoadingWorld;
        self.flush();
        Ok(())
    }

    /// Ask for the encounter region at a world tile.
    pub fn request_encounter(&mut self, tile: i32) -> Result<()> {
        self.context.send(&EncounterRequest { tile })
    }

    /// Handler state.
    pub fn context(&self) -> &SessionContext<H> {
        &self.context
    }

    /// Mutable handler state.
    pub fn context_mut(&mut self) -> &mut SessionContext<H> {
        &mut self.context
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.context.state
    }

    /// Local participant.
    pub fn identity(&self) -> &OwnerId {
        &self.context.identity
    }

    /// Catch-up batch sizing for the world join.
    pub fn catch_up_config(&self) -> CatchUpConfig {
        self.context.catch_up
    }

    /// Producer for work that must run on the simulation thread.
    pub fn deferred(&self) -> DeferredSender<SessionContext<H>> {
        self.deferred.sender()
    }

    /// Progress of the world join, while one is running. Reads 100 once the
    /// horizon is reached; the session switches to playing on the frame the
    /// completion signal fires.
    pub fn loading_progress(&self) -> Option<u8> {
        let driver = self.context.joining.as_ref()?;
        let sim = self.context.sim.as_ref()?;
        Some(driver.progress(sim))
    }

    /// One main-loop frame: deferred work, received packets, the join or the
    /// simulation, then outgoing packets.
    pub fn frame(&mut self) -> SessionFrame {
        let mut report = SessionFrame {
            deferred: self.deferred.run_pending(&mut self.context),
            ..SessionFrame::default()
        };
        self.poll(&mut report);

        if let Err(err) = self.context.advance_join() {
            warn!("Join step failed: {:#}", err);
        }
        if self.context.state == SessionState::Playing {
            report.sim = self.context.sim.as_mut().map(|sim| sim.frame());
            if let Err(err) = self.context.take_autosave() {
                warn!("{:#}", err);
            }
        }

        self.flush();
        report
    }

    fn poll(&mut self, report: &mut SessionFrame) {
        while report.packets + report.rejected < MAX_PACKETS_PER_FRAME {
            if matches!(self.context.state, SessionState::Disconnected { .. }) {
                return;
            }
            let (tag, payload) = match self.transport.try_recv() {
                Ok(Some(packet)) => packet,
                Ok(None) => return,
                Err(err) => {
                    self.context.disconnect(format!("{:#}", err));
                    return;
                }
            };
            if tag.is_client_packet() {
                warn!(%tag, "Ignoring client packet from the authority");
                report.rejected += 1;
                continue;
            }
            match self.router.dispatch(&mut self.context, tag, &payload) {
                Ok(_) => report.packets += 1,
                Err(err) => {
                    warn!("Dropped packet: {:#}", err);
                    report.rejected += 1;
                }
            }
        }
    }

    fn flush(&mut self) {
        for (tag, payload) in self.context.outbox.drain(..) {
            if let Err(err) = self.transport.send(tag, &payload) {
                warn!(%tag, "Send failed: {:#}", err);
                break;
            }
        }

        if let SessionState::Disconnected { reason } = &self.context.state {
            if self.transport.is_open() {
                self.transport.close(reason);
            }
        }
    }

    /// Close the connection from our side.
    pub fn leave(&mut self, reason: &str) {
        self.context.disconnect(reason);
        self.flush();
    }
}
