//! Process-wide, per-session runtime state: driver handles, their background
//! tasks, and the sync coordinator's single-flight state.

use crate::driver::ChatDriver;
use chatmirror_core::{
    models::{SyncKind, SyncOutcome, SyncStats},
    SyncError, SyncResult,
};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

struct SessionHandle {
    driver: Arc<dyn ChatDriver>,
    /// Distinguishes successive connections of the same session so a stale
    /// task cannot tear down a newer handle.
    generation: u64,
    event_task: Option<JoinHandle<()>>,
    sync_timer: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn abort_tasks(&mut self) {
        if let Some(timer) = self.sync_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

/// A sync request waiting for the session's active pass to finish.
pub struct PendingSync {
    pub kind: SyncKind,
    pub reply: oneshot::Sender<SyncResult<SyncOutcome>>,
}

#[derive(Default)]
struct SyncState {
    is_active: bool,
    queue: VecDeque<PendingSync>,
    last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    handles: DashMap<Uuid, SessionHandle>,
    sync_states: DashMap<Uuid, SyncState>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the driver for `session_id`, failing if one is already held.
    /// Returns the generation identifying this connection.
    pub fn register(&self, session_id: Uuid, driver: Arc<dyn ChatDriver>) -> SyncResult<u64> {
        match self.handles.entry(session_id) {
            Entry::Occupied(_) => Err(SyncError::AlreadyConnected(session_id)),
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(SessionHandle {
                    driver,
                    generation,
                    event_task: None,
                    sync_timer: None,
                });
                debug!(%session_id, generation, "Registered driver handle");
                Ok(generation)
            }
        }
    }

    pub fn driver(&self, session_id: Uuid) -> Option<Arc<dyn ChatDriver>> {
        self.handles.get(&session_id).map(|h| h.driver.clone())
    }

    pub fn is_registered(&self, session_id: Uuid) -> bool {
        self.handles.contains_key(&session_id)
    }

    pub fn generation(&self, session_id: Uuid) -> Option<u64> {
        self.handles.get(&session_id).map(|h| h.generation)
    }

    pub fn attach_event_task(&self, session_id: Uuid, generation: u64, task: JoinHandle<()>) {
        match self.handles.get_mut(&session_id) {
            Some(mut handle) if handle.generation == generation => {
                handle.event_task = Some(task);
            }
            _ => task.abort(),
        }
    }

    /// Installs the periodic sync task, aborting any previous one.
    pub fn attach_sync_timer(&self, session_id: Uuid, generation: u64, timer: JoinHandle<()>) {
        match self.handles.get_mut(&session_id) {
            Some(mut handle) if handle.generation == generation => {
                if let Some(previous) = handle.sync_timer.replace(timer) {
                    previous.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    /// Drops the handle if it still belongs to `generation`. Used from the
    /// session's own event task, which is detached rather than aborted.
    pub fn release(&self, session_id: Uuid, generation: u64) -> Option<Arc<dyn ChatDriver>> {
        let (_, mut handle) = self
            .handles
            .remove_if(&session_id, |_, h| h.generation == generation)?;

        if let Some(timer) = handle.sync_timer.take() {
            timer.abort();
        }
        handle.event_task.take();
        debug!(%session_id, generation, "Released driver handle");
        Some(handle.driver)
    }

    /// Drops the handle and aborts its background tasks.
    pub fn unregister(&self, session_id: Uuid) -> Option<Arc<dyn ChatDriver>> {
        let (_, mut handle) = self.handles.remove(&session_id)?;
        handle.abort_tasks();
        debug!(%session_id, generation = handle.generation, "Unregistered driver handle");
        Some(handle.driver)
    }

    pub fn session_ids(&self) -> Vec<Uuid> {
        self.handles.iter().map(|entry| *entry.key()).collect()
    }

    /// Starts a sync pass for the session or queues `pending` behind the active one.
    /// Returns the request to run now, if any.
    pub fn begin_sync(&self, session_id: Uuid, pending: PendingSync) -> Option<PendingSync> {
        let mut state = self.sync_states.entry(session_id).or_default();
        if state.is_active {
            state.queue.push_back(pending);
            debug!(%session_id, queue_length = state.queue.len(), "Sync already active, queued request");
            None
        } else {
            state.is_active = true;
            Some(pending)
        }
    }

    /// Stamps the finished pass and hands over to the next queued request.
    /// Clears the active flag when the queue is empty.
    pub fn finish_sync(&self, session_id: Uuid) -> Option<PendingSync> {
        let mut state = self.sync_states.entry(session_id).or_default();
        state.last_sync_time = Some(Utc::now());
        let next = state.queue.pop_front();
        if next.is_none() {
            state.is_active = false;
        }
        next
    }

    pub fn sync_stats(&self, session_id: Uuid) -> SyncStats {
        match self.sync_states.get(&session_id) {
            Some(state) => SyncStats {
                is_active: state.is_active,
                queue_length: state.queue.len(),
                last_sync_time: state.last_sync_time,
            },
            None => SyncStats {
                is_active: false,
                queue_length: 0,
                last_sync_time: None,
            },
        }
    }

    /// Drops the session's sync bookkeeping unless a pass is still running.
    /// Returns whether anything was removed.
    pub fn forget(&self, session_id: Uuid) -> bool {
        let removed = self
            .sync_states
            .remove_if(&session_id, |_, state| !state.is_active)
            .is_some();
        if removed {
            debug!(%session_id, "Dropped sync state");
        }
        removed
    }

    /// Drops every handle, aborting their tasks. Returns the drivers for teardown.
    pub fn shutdown(&self) -> Vec<(Uuid, Arc<dyn ChatDriver>)> {
        self.session_ids()
            .into_iter()
            .filter_map(|id| self.unregister(id).map(|driver| (id, driver)))
            .collect()
    }
}
