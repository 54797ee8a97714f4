//! One recurring poll task per live process.
//!
//! A task moves `Polling -> Finalized` exactly once, when its process reports a
//! terminal state, or `Polling -> Cancelled` when torn down early. Tasks leave
//! the scheduler on either transition, so a task exists exactly as long as its
//! item is being polled.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::item::{ItemId, ProcessHandle, ProcessState};
use crate::logging::{self, FlushOutcome, OutputSource};
use crate::store::ItemStore;

/// Status and control of a tracked process, as exposed by the host.
pub trait ProcessProbe: Send + Sync {
    fn state(&self) -> ProcessState;
    fn terminate(&self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Polling,
    Finalized,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    StillPolling,
    Finalized(Option<i32>),
    Cancelled,
}

struct PollTask {
    handle: ProcessHandle,
    output: Option<Arc<dyn OutputSource>>,
    process: Arc<dyn ProcessProbe>,
    state: TaskState,
    next_due: Instant,
}

impl PollTask {
    fn transition(&mut self, to: TaskState) {
        debug_assert_eq!(self.state, TaskState::Polling);
        self.state = to;
    }
}

pub struct PollScheduler {
    period: Duration,
    log_dir: PathBuf,
    tasks: BTreeMap<ItemId, PollTask>,
}

impl PollScheduler {
    pub fn new(period: Duration, log_dir: PathBuf) -> Self {
        Self {
            period,
            log_dir,
            tasks: BTreeMap::new(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn attach(
        &mut self,
        item: ItemId,
        handle: ProcessHandle,
        output: Option<Arc<dyn OutputSource>>,
        process: Arc<dyn ProcessProbe>,
    ) {
        self.tasks.insert(
            item,
            PollTask {
                handle,
                output,
                process,
                state: TaskState::Polling,
                next_due: Instant::now() + self.period,
            },
        );
    }

    /// Stops polling without flushing or finalizing.
    pub fn cancel(&mut self, item: ItemId) -> bool {
        match self.tasks.remove(&item) {
            Some(mut task) => {
                task.transition(TaskState::Cancelled);
                debug!("cancelled poll task for item {item}");
                true
            }
            None => false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn item_for_handle(&self, handle: ProcessHandle) -> Option<ItemId> {
        self.tasks
            .iter()
            .find(|(_, task)| task.handle == handle)
            .map(|(item, _)| *item)
    }

    pub fn output(&self, item: ItemId) -> Option<Arc<dyn OutputSource>> {
        self.tasks.get(&item).and_then(|task| task.output.clone())
    }

    pub fn process(&self, item: ItemId) -> Option<Arc<dyn ProcessProbe>> {
        self.tasks.get(&item).map(|task| Arc::clone(&task.process))
    }

    /// Flushes whatever the stream still holds and then forgets it. Later
    /// ticks keep polling status but no longer copy output.
    pub fn detach_output(&mut self, item: ItemId, store: &mut ItemStore) {
        let Some(task) = self.tasks.get_mut(&item) else {
            return;
        };
        if let Some(output) = task.output.take() {
            flush_item(store, item, output.as_ref(), &self.log_dir);
        }
    }

    /// Items whose period has elapsed at `instant`. Each returned task is
    /// rescheduled one period later; the caller runs the ticks.
    pub fn take_due(&mut self, instant: Instant) -> Vec<ItemId> {
        let mut due = Vec::new();
        for (item, task) in self.tasks.iter_mut() {
            if task.next_due <= instant {
                task.next_due = instant + self.period;
                due.push(*item);
            }
        }
        due
    }

    /// Runs one poll tick for `item`.
    pub fn tick(&mut self, item: ItemId, store: &mut ItemStore, now: DateTime<Utc>) -> TickOutcome {
        if !self.tasks.contains_key(&item) {
            return TickOutcome::Cancelled;
        }
        if !store.contains(item) {
            debug!("item {item} vanished from the registry; dropping its poll task");
            self.cancel(item);
            return TickOutcome::Cancelled;
        }

        let (output, process) = match self.tasks.get(&item) {
            Some(task) => (task.output.clone(), Arc::clone(&task.process)),
            None => return TickOutcome::Cancelled,
        };

        if let Some(output) = &output {
            flush_item(store, item, output.as_ref(), &self.log_dir);
        }

        let state = process.state();
        if !state.is_terminal() {
            return TickOutcome::StillPolling;
        }

        if let Some(output) = &output {
            flush_item(store, item, output.as_ref(), &self.log_dir);
        }
        let exit_status = state.exit_status();
        if store.finalize(item, now, exit_status) {
            info!("item {item} finished with status {exit_status:?}");
        }
        if let Some(mut task) = self.tasks.remove(&item) {
            task.transition(TaskState::Finalized);
        }
        TickOutcome::Finalized(exit_status)
    }
}

pub(crate) fn flush_item(
    store: &mut ItemStore,
    item: ItemId,
    output: &dyn OutputSource,
    log_dir: &Path,
) -> Option<FlushOutcome> {
    let entry = store.get_mut(item)?;
    let path = logging::log_path(log_dir, entry);
    match logging::flush(entry, output, &path) {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            warn!("failed to flush output for item {}: {err:#}", entry.target_label());
            None
        }
    }
}
