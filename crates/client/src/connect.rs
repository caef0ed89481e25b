//! Async entry points: connecting over QUIC and driving a session.

use crate::session::{Session, SessionState};
use anyhow::{Context, Result};
use colonysync_net::{ClientEndpoint, QuicTransport, Transport};
use colonysync_sim::SimulationHooks;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, instrument};

/// An open QUIC session and the endpoint that owns it.
pub struct QuicLink {
    /// Keeps the local socket alive for the transport.
    pub endpoint: ClientEndpoint,
    /// Session stream.
    pub transport: QuicTransport,
}

/// Connect to the authority at `addr`, giving up after `connect_timeout`.
#[instrument(skip(connect_timeout))]
pub async fn connect_quic(addr: SocketAddr, connect_timeout: Duration) -> Result<QuicLink> {
    let endpoint = ClientEndpoint::new().context("Failed to create client endpoint")?;
    let transport = timeout(connect_timeout, endpoint.connect(addr))
        .await
        .with_context(|| format!("Timed out connecting to {}", addr))??;
    Ok(QuicLink {
        endpoint,
        transport,
    })
}

/// Join and run frames every `frame_interval` until the session disconnects
/// or `max_frames` frames have run. While the world is loading, frames are
/// spaced by the catch-up batch yield instead.
#[instrument(skip_all, fields(identity = %session.identity()))]
pub async fn run_session<T, H>(
    session: &mut Session<T, H>,
    frame_interval: Duration,
    max_frames: Option<u64>,
) -> Result<SessionState>
where
    T: Transport,
    H: SimulationHooks + 'static,
{
    if *session.state() == SessionState::Connecting {
        session.join()?;
    }
    let mut frames = 0u64;
    loop {
        session.frame();
        frames += 1;
        if matches!(session.state(), SessionState::Disconnected { .. }) {
            break;
        }
        if max_frames.is_some_and(|max| frames >= max) {
            break;
        }
        let pause = if *session.state() == SessionState::LoadingWorld {
            session.catch_up_config().batch_yield
        } else {
            frame_interval
        };
        sleep(pause).await;
    }
    info!(frames, state = %session.state(), "Session loop ended");
    Ok(session.state().clone())
}
