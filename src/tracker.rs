//! Inbound event interface between the host and the registry.
//!
//! The tracker is the single owner of the item store and the poll scheduler.
//! Callers serialize access to it (the `run` command drives it from one
//! `tokio::select!` loop), which is what keeps registry mutation ordered.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::errors::TrackerError;
use crate::filter::FilterSet;
use crate::item::{Handler, Item, ItemId, ProcessHandle, Provenance};
use crate::logging::{self, OutputSource};
use crate::scheduler::{PollScheduler, ProcessProbe, TickOutcome};
use crate::storage::PersistedState;
use crate::store::ItemStore;
use crate::view::{self, Row};

/// What the host reports when it has spawned a process.
pub struct SpawnNotice {
    pub name: String,
    pub directory: String,
    pub handle: ProcessHandle,
    pub pid: Option<u32>,
    pub provenance: Provenance,
    pub output: Option<Arc<dyn OutputSource>>,
    pub process: Arc<dyn ProcessProbe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Registered(ItemId),
    Duplicate(ItemId),
}

impl SpawnOutcome {
    pub fn item(self) -> ItemId {
        match self {
            SpawnOutcome::Registered(id) | SpawnOutcome::Duplicate(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// A termination request reached the process; a later tick finalizes it.
    Requested,
    /// No process was left behind the item, so it was closed without a status.
    Repaired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered(ItemId),
    Finalized(ItemId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerunSpec {
    pub command: String,
    pub directory: String,
    pub handler: Handler,
}

pub struct Tracker {
    store: ItemStore,
    scheduler: PollScheduler,
    seen_handles: HashMap<ProcessHandle, ItemId>,
    /// Items whose state this tracker has written. History merges never
    /// overwrite them.
    owned: HashSet<ItemId>,
    events: Option<UnboundedSender<RegistryEvent>>,
}

impl Tracker {
    pub fn new(store: ItemStore, scheduler: PollScheduler) -> Self {
        Self {
            store,
            scheduler,
            seen_handles: HashMap::new(),
            owned: HashSet::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<RegistryEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn get(&self, id: ItemId) -> Result<&Item, TrackerError> {
        self.store.get(id).ok_or(TrackerError::ItemNotFound(id.0))
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// Takes in history written by other invocations since this tracker
    /// loaded. Items this tracker registered or closed keep their local state.
    pub fn merge_history(&mut self, state: PersistedState) {
        self.store.merge_from(state, &self.owned);
    }

    /// Registers a freshly spawned process and starts polling it. A repeated
    /// notification for a handle that is already tracked is dropped.
    pub fn on_spawn(&mut self, notice: SpawnNotice, now: DateTime<Utc>) -> SpawnOutcome {
        if let Some(existing) = self.seen_handles.get(&notice.handle).copied() {
            if self.store.contains(existing) {
                debug!(
                    "ignoring duplicate spawn notification for process {} (item {existing})",
                    notice.handle
                );
                return SpawnOutcome::Duplicate(existing);
            }
        }

        let handler = Handler::resolve(&notice.provenance);
        let id = self
            .store
            .register(&notice.name, handler, &notice.directory, now);
        if let Some(item) = self.store.get_mut(id) {
            item.pid = notice.pid;
        }
        self.seen_handles.insert(notice.handle, id);
        self.owned.insert(id);
        self.scheduler
            .attach(id, notice.handle, notice.output, notice.process);
        info!("tracking item {id}: {}", notice.name);
        self.emit(RegistryEvent::Registered(id));
        SpawnOutcome::Registered(id)
    }

    /// Final best-effort flush before the host drops a process's output.
    pub fn on_teardown(&mut self, handle: ProcessHandle) {
        match self.scheduler.item_for_handle(handle) {
            Some(id) => self.scheduler.detach_output(id, &mut self.store),
            None => debug!("teardown for untracked process {handle}"),
        }
    }

    /// Asks the host to terminate the item's process. The item is finalized
    /// by the poll tick that observes the exit, not here.
    pub fn kill(&mut self, id: ItemId, now: DateTime<Utc>) -> Result<KillOutcome, TrackerError> {
        let item = self.get(id)?;
        if let Some(process) = self.scheduler.process(id) {
            process.terminate()?;
            info!("termination requested for item {}", item.target_label());
            return Ok(KillOutcome::Requested);
        }
        if item.is_live() {
            info!("closing item {} whose process is gone", item.target_label());
            self.store.finalize(id, now, None);
            self.owned.insert(id);
            self.emit(RegistryEvent::Finalized(id));
            return Ok(KillOutcome::Repaired);
        }
        Err(TrackerError::NoLiveProcessForKill(item.target_label()))
    }

    /// Stops polling the item without flushing or finalizing it. The item
    /// stays live until a kill repairs it.
    pub fn release(&mut self, id: ItemId) -> bool {
        let released = self.scheduler.cancel(id);
        if released {
            debug!("released poll task for item {id}");
        }
        released
    }

    pub fn tick(&mut self, id: ItemId, now: DateTime<Utc>) -> TickOutcome {
        let outcome = self.scheduler.tick(id, &mut self.store, now);
        if matches!(outcome, TickOutcome::Finalized(_)) {
            self.emit(RegistryEvent::Finalized(id));
        }
        outcome
    }

    /// Ticks every task whose period has elapsed at `instant`.
    pub fn poll(&mut self, instant: Instant, now: DateTime<Utc>) -> Vec<(ItemId, TickOutcome)> {
        self.scheduler
            .take_due(instant)
            .into_iter()
            .map(|id| (id, self.tick(id, now)))
            .collect()
    }

    pub fn snapshot(
        &self,
        filters: &FilterSet,
        now: DateTime<Utc>,
        recent_window: Duration,
    ) -> Vec<(Item, Row)> {
        filters
            .apply(self.store.all())
            .into_iter()
            .map(|item| (item.clone(), view::project(item, now, recent_window)))
            .collect()
    }

    pub fn log_path(&self, id: ItemId) -> Result<PathBuf, TrackerError> {
        let item = self.get(id)?;
        Ok(logging::log_path(self.scheduler.log_dir(), item))
    }

    /// The item's log file, provided some output has been written to it.
    pub fn log_for(&self, id: ItemId) -> Result<PathBuf, TrackerError> {
        let path = self.log_path(id)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(TrackerError::NoLogForItem(self.get(id)?.target_label()))
        }
    }

    /// What the item's live stream has produced at or after `offset`.
    pub fn live_output(&self, id: ItemId, offset: u64) -> Result<Vec<u8>, TrackerError> {
        let item = self.get(id)?;
        self.scheduler
            .output(id)
            .and_then(|output| output.read_from(offset))
            .ok_or_else(|| TrackerError::NoBufferForItem(item.target_label()))
    }

    pub fn rerun_spec(&self, id: ItemId) -> Result<RerunSpec, TrackerError> {
        let item = self.get(id)?;
        let handler = item
            .handler
            .ok_or_else(|| TrackerError::NoHandlerForItem(item.target_label()))?;
        Ok(RerunSpec {
            command: item.name.clone(),
            directory: item.directory.clone(),
            handler,
        })
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
