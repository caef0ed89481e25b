use anyhow::Result;
use colonysync_net::DEFAULT_PORT;
use colonysync_sim::catchup::DEFAULT_BATCH_TICKS;
use colonysync_sim::CatchUpConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "colonysync.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Name to play as when `--identity` is not given.
    pub identity: Option<String>,
    /// Port used when the join target has none.
    pub default_port: u16,
    pub connect_timeout_secs: u64,
    /// Ticks per catch-up batch.
    pub catch_up_batch: u64,
    /// Pause between catch-up batches (ms).
    pub catch_up_yield_ms: u64,
    /// Main loop frame interval (ms).
    pub frame_interval_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            identity: None,
            default_port: DEFAULT_PORT,
            connect_timeout_secs: 10,
            catch_up_batch: DEFAULT_BATCH_TICKS,
            catch_up_yield_ms: 50,
            frame_interval_ms: 16,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from `path`, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<LauncherConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    LauncherConfig::default()
                }
            },
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound
                    || path != Path::new(DEFAULT_CONFIG_PATH)
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                LauncherConfig::default()
            }
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn catch_up(&self) -> CatchUpConfig {
        CatchUpConfig {
            batch_ticks: self.catch_up_batch.max(1),
            batch_yield: Duration::from_millis(self.catch_up_yield_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
