//! colonysync - deterministic lockstep colony simulation participant
//!
//! Runs a local world offline, or joins an authority and follows it.

mod config;
mod launch;

use anyhow::{Context, Result};
use clap::Parser;
use colonysync_client::{connect_quic, run_session, QuicLink, Session, SessionState};
use colonysync_sim::NoopHooks;
use config::{LauncherConfig, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic lockstep colony simulation participant", long_about = None)]
struct Args {
    /// Name to play as
    #[arg(long)]
    identity: Option<String>,
    /// Join an authority at host[:port] (default 127.0.0.1)
    #[arg(long, num_args = 0..=1, default_missing_value = launch::DEFAULT_HOST)]
    connect: Option<String>,
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// World ticks to run offline
    #[arg(long, default_value_t = 600)]
    ticks: u64,
    /// Frames to run when joined (runs until disconnected if absent)
    #[arg(long)]
    frames: Option<u64>,
    /// Write the offline world document here when done
    #[arg(long)]
    save: Option<PathBuf>,
    /// Write the effective configuration back to the config file
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // INFO by default, RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting colonysync v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = LauncherConfig::load_from_path(&args.config);
    let identity = launch::resolve_identity(args.identity.as_deref(), config.identity.as_deref());
    info!(%identity, "Identity resolved");

    if args.write_config {
        let effective = LauncherConfig {
            identity: Some(identity.as_str().to_string()),
            ..config.clone()
        };
        effective
            .save_to_path(&args.config)
            .with_context(|| format!("Failed to write {}", args.config.display()))?;
    }

    let Some(target) = args.connect.as_deref() else {
        let summary = launch::run_offline(&identity, args.ticks, args.save.as_deref())?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    };
    if args.save.is_some() {
        warn!("--save only applies to offline runs");
    }

    let addr = launch::resolve_target(target, config.default_port)?;
    let QuicLink {
        endpoint,
        transport,
    } = connect_quic(addr, config.connect_timeout()).await?;
    let mut session = Session::new(transport, identity, NoopHooks, config.catch_up());
    let state = run_session(&mut session, config.frame_interval(), args.frames).await?;
    if !matches!(state, SessionState::Disconnected { .. }) {
        session.leave("Client exiting");
    }
    endpoint.close();
    info!(%state, "Session ended");
    Ok(())
}
