use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub state_path: PathBuf,
    pub log_dir: PathBuf,
    /// Period of each poll task.
    pub poll_interval: Duration,
    /// Items started within this window render their start as relative time.
    pub recent_window: chrono::Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let base_dir = env::var("CMDTRACK_HOME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("cmdtrack")
            });
        let poll_interval =
            Duration::from_millis(env_u64("CMDTRACK_POLL_INTERVAL_MS", 1_000).max(10));
        let recent_days = env_u64("CMDTRACK_RECENT_DAYS", 7).clamp(1, 36_500);

        let config = Self {
            state_path: base_dir.join("history.json"),
            log_dir: base_dir.join("logs"),
            base_dir,
            poll_interval,
            recent_window: chrono::Duration::days(recent_days as i64),
        };
        config.ensure_layout()?;
        Ok(config)
    }

    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("failed to create {}", self.base_dir.display()))?;
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        Ok(())
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
