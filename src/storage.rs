use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::item::Item;

/// On-disk command history. Items are stored newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub next_id: u64,
    pub items: Vec<Item>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            next_id: 1,
            items: Vec::new(),
        }
    }
}

pub fn load_history(path: &Path) -> Result<PersistedState> {
    if !path.exists() {
        return Ok(PersistedState::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read history {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(PersistedState::default());
    }

    match serde_json::from_str::<PersistedState>(&content) {
        Ok(state) => Ok(state),
        Err(error) => {
            let backup = corrupted_backup_path(path);
            match fs::rename(path, &backup) {
                Ok(()) => warn!(
                    "history {} is corrupted ({error}), moved to {}",
                    path.display(),
                    backup.display()
                ),
                Err(rename_err) => warn!(
                    "failed to move corrupted history {} -> {}: {rename_err}",
                    path.display(),
                    backup.display()
                ),
            }
            Ok(PersistedState::default())
        }
    }
}

/// Writes the history through a sibling temp file so readers never observe a
/// partial document.
pub fn save_history(path: &Path, state: &PersistedState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let payload = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)
        .with_context(|| format!("failed to write temporary history {}", tmp_path.display()))?;

    if let Err(rename_err) = fs::rename(&tmp_path, path) {
        #[cfg(windows)]
        {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("failed to remove history {}", path.display()))?;
                fs::rename(&tmp_path, path)
                    .with_context(|| format!("failed to replace history {}", path.display()))?;
                return Ok(());
            }
        }
        return Err(rename_err)
            .with_context(|| format!("failed to replace history {}", path.display()));
    }

    Ok(())
}

/// Exclusive advisory lock on the history's sidecar `.lock` file. Held
/// across a load, merge and save so concurrent invocations never write from
/// a stale snapshot. Released on drop.
pub struct HistoryLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

pub fn lock_history(path: &Path) -> Result<HistoryLock> {
    let lock_path = path.with_extension("lock");
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;

    #[cfg(unix)]
    {
        use nix::fcntl::{Flock, FlockArg};

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| std::io::Error::from(errno))
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;
        Ok(HistoryLock { _lock: lock })
    }

    #[cfg(not(unix))]
    {
        Ok(HistoryLock { _file: file })
    }
}

fn corrupted_backup_path(path: &Path) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    path.with_extension(format!("corrupt-{suffix}.json"))
}
