use anyhow::Result;
use chrono::Utc;

use crate::config::AppConfig;
use crate::item::ItemId;
use crate::tracker::KillOutcome;

use super::common::{load_tracker, with_locked_history};

/// A live item belongs to the `run` that spawned it, so the signal goes to its
/// process and that supervisor records the exit. Items whose process is gone
/// fall through to the tracker's own kill handling.
pub(crate) fn run(config: &AppConfig, id: u64) -> Result<()> {
    let mut tracker = load_tracker(config)?;
    let id = ItemId(id);
    let item = tracker.get(id)?.clone();

    if item.is_live() {
        if let Some(pid) = item.pid {
            if signal_process(pid)? {
                println!("Termination requested for {}", item.target_label());
                return Ok(());
            }
        }
    }

    match with_locked_history(config, &mut tracker, |tracker| tracker.kill(id, Utc::now()))?? {
        KillOutcome::Requested => println!("Termination requested for {}", item.target_label()),
        KillOutcome::Repaired => {
            println!("Closed {}; its process is no longer running", item.target_label());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn signal_process(pid: u32) -> Result<bool> {
    use anyhow::Context;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    let pid = Pid::from_raw(raw);
    if kill(pid, None::<Signal>).is_err() {
        return Ok(false);
    }
    kill(pid, Signal::SIGTERM).with_context(|| format!("failed to signal pid {pid}"))?;
    Ok(true)
}

#[cfg(not(unix))]
fn signal_process(_pid: u32) -> Result<bool> {
    Ok(false)
}
