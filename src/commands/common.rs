use anyhow::Result;

use crate::config::AppConfig;
use crate::scheduler::PollScheduler;
use crate::storage::{load_history, lock_history, save_history};
use crate::store::ItemStore;
use crate::tracker::Tracker;

pub(crate) fn load_tracker(config: &AppConfig) -> Result<Tracker> {
    let history = load_history(&config.state_path)?;
    let scheduler = PollScheduler::new(config.poll_interval, config.log_dir.clone());
    Ok(Tracker::new(ItemStore::from_state(history), scheduler))
}

/// Runs `update` against the latest history while holding the history lock,
/// then writes the merged result back. Ids handed out inside `update` are
/// unique across concurrent invocations.
pub(crate) fn with_locked_history<T>(
    config: &AppConfig,
    tracker: &mut Tracker,
    update: impl FnOnce(&mut Tracker) -> T,
) -> Result<T> {
    let _lock = lock_history(&config.state_path)?;
    tracker.merge_history(load_history(&config.state_path)?);
    let value = update(tracker);
    save_history(&config.state_path, &tracker.store().to_state())?;
    Ok(value)
}

pub(crate) fn save_tracker(config: &AppConfig, tracker: &mut Tracker) -> Result<()> {
    with_locked_history(config, tracker, |_| ())
}
