// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.

//! The single write path shared by every mutation.
//!
//! Writes go to the backend first when one is configured. Tasks whose id
//! the backend issued but could not receive an update are queued in an
//! outbox that the sync worker retries. Whenever the backend is missing or
//! refused a write, the full collection is mirrored to the local store so
//! nothing is lost across restarts. The outbox is mirrored too.
use std::collections::VecDeque;

use anyhow::Context;
use chrono::{FixedOffset, Offset, Utc};
use common::{Settings, Task, TaskDraft, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::local::{LocalStore, OUTBOX_SLOT};
use crate::remote::{NewTaskRow, RestBackend, SettingsRow, TaskUpdateRow};

/// Where a mutation ended up.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    /// Nothing changed, so nothing was written.
    Unchanged,
    Remote,
    /// Kept in the local store; remote ids that missed the backend are queued.
    LocalFallback,
    /// Neither store accepted the write. The in-memory state still has it.
    Failed,
}

impl PersistOutcome {
    /// The less successful of the two.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Remote,
    Local,
    Empty,
}

#[derive(Debug, Clone)]
pub struct LoadedState {
    pub tasks: Vec<Task>,
    pub settings: Settings,
    pub source: LoadSource,
}

/// A remote write waiting for the backend to come back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingWrite {
    Update { id: i64, row: TaskUpdateRow },
    Delete { id: i64 },
}

impl PendingWrite {
    pub fn id(&self) -> i64 {
        match self {
            PendingWrite::Update { id, .. } | PendingWrite::Delete { id } => *id,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

pub struct Persistence {
    remote: Option<RestBackend>,
    local: LocalStore,
    // Locked only between awaits.
    outbox: Mutex<VecDeque<PendingWrite>>,
    utc_offset: FixedOffset,
}

impl Persistence {
    pub fn new(remote: Option<RestBackend>, local: LocalStore) -> Self {
        Self {
            remote,
            local,
            outbox: Mutex::new(VecDeque::new()),
            utc_offset: Utc.fix(),
        }
    }

    /// Offset used to read plain dates coming back from the backend.
    pub fn with_utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn pending(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Startup load: the backend wins, then the local snapshot, then nothing.
    ///
    /// A backend load still keeps what only this machine has: queued writes
    /// are replayed over the rows, and tasks with local ids are merged in.
    pub async fn load(&self) -> LoadedState {
        let mut settings = match self.local.load_settings().await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring stored settings: {:#}", e);
                Settings::default()
            }
        };

        if let Some(remote) = &self.remote {
            self.restore_outbox().await;
            match remote.list_tasks().await {
                Ok(rows) => {
                    match remote.fetch_settings().await {
                        Ok(Some(row)) => row.apply_to(&mut settings),
                        Ok(None) => debug!("Backend has no settings row yet."),
                        Err(e) => warn!("Failed to load settings from the backend: {:#}", e),
                    }
                    let mut tasks: Vec<Task> = rows
                        .into_iter()
                        .map(|row| row.into_task(&self.utc_offset))
                        .collect();
                    info!("Loaded {} tasks from the backend.", tasks.len());
                    self.replay_outbox(&mut tasks);
                    self.merge_local_ids(&mut tasks).await;
                    return LoadedState {
                        tasks,
                        settings,
                        source: LoadSource::Remote,
                    };
                }
                Err(e) => warn!("Backend unavailable, falling back to local storage: {:#}", e),
            }
        }

        match self.local.load_tasks().await {
            Ok(Some(tasks)) => {
                info!("Loaded {} tasks from local storage.", tasks.len());
                LoadedState {
                    tasks,
                    settings,
                    source: LoadSource::Local,
                }
            }
            Ok(None) => LoadedState {
                tasks: Vec::new(),
                settings,
                source: LoadSource::Empty,
            },
            Err(e) => {
                error!("Failed to load tasks from local storage: {:#}", e);
                LoadedState {
                    tasks: Vec::new(),
                    settings,
                    source: LoadSource::Empty,
                }
            }
        }
    }

    async fn restore_outbox(&self) {
        match self.local.load_json::<VecDeque<PendingWrite>>(OUTBOX_SLOT, "outbox").await {
            Ok(Some(queued)) => {
                if !queued.is_empty() {
                    info!("Restored {} queued writes from local storage.", queued.len());
                }
                *self.outbox.lock() = queued;
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring stored outbox: {:#}", e),
        }
    }

    /// Applies queued writes to freshly loaded rows so the backend's stale
    /// copy does not undo them.
    fn replay_outbox(&self, tasks: &mut Vec<Task>) {
        for write in self.outbox.lock().iter() {
            match write {
                PendingWrite::Update { id, row } => {
                    if let Some(task) = tasks.iter_mut().find(|t| t.id.as_remote() == Some(*id)) {
                        row.apply_to(task);
                    }
                }
                PendingWrite::Delete { id } => tasks.retain(|t| t.id.as_remote() != Some(*id)),
            }
        }
    }

    /// Local-id tasks never reach the backend, so the local snapshot is
    /// their only home.
    async fn merge_local_ids(&self, tasks: &mut Vec<Task>) {
        let stored = match self.local.load_tasks().await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                error!("Failed to read local-only tasks: {:#}", e);
                return;
            }
        };
        let before = tasks.len();
        tasks.extend(stored.into_iter().filter(|task| !task.id.is_remote()));
        if tasks.len() > before {
            info!("Kept {} tasks that only exist locally.", tasks.len() - before);
            // Newest first, like the backend's listing.
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
    }

    /// Asks the backend to create the task. `None` when there is no backend
    /// or it refused, in which case the caller assigns a local id.
    pub async fn insert_remote(&self, draft: &TaskDraft) -> Option<Task> {
        let remote = self.remote.as_ref()?;
        match remote.insert_task(&NewTaskRow::from_draft(draft)).await {
            Ok(row) => {
                debug!("Backend assigned id {} to the new task.", row.id);
                Some(row.into_task_with(draft.clone(), &self.utc_offset))
            }
            Err(e) => {
                warn!("Failed to insert task remotely, keeping it local: {:#}", e);
                None
            }
        }
    }

    /// Persists changed tasks. `snapshot` is the whole collection after the change.
    pub async fn write_tasks(&self, changed: &[Task], snapshot: &[Task]) -> PersistOutcome {
        let Some(remote) = &self.remote else {
            return self.mirror_local(snapshot).await;
        };
        let mut all_sent = true;
        let mut queued = false;
        for task in changed {
            // Local ids only live in the snapshot.
            let Some(id) = task.id.as_remote() else {
                all_sent = false;
                continue;
            };
            let row = TaskUpdateRow::from(task);
            if let Err(e) = remote.update_task(id, &row).await {
                warn!("Failed to update task {} remotely, queued: {:#}", id, e);
                self.enqueue(PendingWrite::Update { id, row });
                all_sent = false;
                queued = true;
            }
        }
        if queued {
            self.save_outbox().await;
        }
        if all_sent {
            PersistOutcome::Remote
        } else {
            self.mirror_local(snapshot).await
        }
    }

    /// Persists removals. `snapshot` is the whole collection after the removal.
    pub async fn delete_tasks(&self, removed: &[TaskId], snapshot: &[Task]) -> PersistOutcome {
        let Some(remote) = &self.remote else {
            return self.mirror_local(snapshot).await;
        };
        let mut all_sent = true;
        let mut queued = false;
        for id in removed {
            let Some(id) = id.as_remote() else {
                all_sent = false;
                continue;
            };
            if let Err(e) = remote.delete_task(id).await {
                warn!("Failed to delete task {} remotely, queued: {:#}", id, e);
                self.enqueue(PendingWrite::Delete { id });
                all_sent = false;
                queued = true;
            }
        }
        if queued {
            self.save_outbox().await;
        }
        if all_sent {
            PersistOutcome::Remote
        } else {
            self.mirror_local(snapshot).await
        }
    }

    /// Writes the whole collection to the local store.
    pub async fn mirror_local(&self, snapshot: &[Task]) -> PersistOutcome {
        match self.local.save_tasks(snapshot).await {
            Ok(()) => PersistOutcome::LocalFallback,
            Err(e) => {
                error!("Failed to save tasks locally: {:#}", e);
                PersistOutcome::Failed
            }
        }
    }

    /// Settings always go to the local store; the backend gets the fields
    /// it mirrors.
    pub async fn save_settings(&self, settings: &Settings) -> PersistOutcome {
        let local = match self.local.save_settings(settings).await {
            Ok(()) => PersistOutcome::LocalFallback,
            Err(e) => {
                error!("Failed to save settings locally: {:#}", e);
                PersistOutcome::Failed
            }
        };
        let Some(remote) = &self.remote else {
            return local;
        };
        match remote.upsert_settings(&SettingsRow::from(settings)).await {
            Ok(()) => PersistOutcome::Remote,
            Err(e) => {
                warn!("Failed to save settings remotely: {:#}", e);
                local
            }
        }
    }

    /// Drops every stored task and the settings, locally and remotely.
    ///
    /// Remote deletes that fail are queued as usual. A local store that
    /// cannot be cleared is an error: the old snapshot would come back on
    /// the next start.
    pub async fn clear(&self, removed: &[TaskId]) -> anyhow::Result<PersistOutcome> {
        self.outbox.lock().clear();
        let outcome = if self.remote.is_some() {
            self.delete_tasks(removed, &[]).await
        } else {
            PersistOutcome::LocalFallback
        };
        self.local
            .clear()
            .await
            .context("Failed to clear local storage")?;
        // Deletes queued above must outlive the cleared slots.
        if self.pending() > 0 {
            self.save_outbox().await;
        }
        Ok(outcome)
    }

    async fn save_outbox(&self) {
        let queued: Vec<PendingWrite> = self.outbox.lock().iter().cloned().collect();
        if let Err(e) = self.local.save_json(OUTBOX_SLOT, &queued, "outbox").await {
            error!("Failed to save the outbox locally: {:#}", e);
        }
    }

    /// Queues a write, collapsing it with anything already queued for the
    /// same task.
    fn enqueue(&self, write: PendingWrite) {
        let mut outbox = self.outbox.lock();
        let id = write.id();
        match &write {
            PendingWrite::Update { .. } => {
                if let Some(slot) = outbox
                    .iter_mut()
                    .find(|queued| matches!(queued, PendingWrite::Update { id: q, .. } if *q == id))
                {
                    *slot = write;
                    return;
                }
            }
            PendingWrite::Delete { .. } => outbox.retain(|queued| queued.id() != id),
        }
        outbox.push_back(write);
    }

    /// Sends queued writes in order, stopping at the first failure so
    /// later writes never overtake earlier ones.
    pub async fn flush_outbox(&self) -> FlushReport {
        let Some(remote) = &self.remote else {
            return FlushReport::default();
        };
        let mut sent = 0;
        loop {
            let next = self.outbox.lock().pop_front();
            let Some(write) = next else {
                break;
            };
            let result = match &write {
                PendingWrite::Update { id, row } => remote.update_task(*id, row).await,
                PendingWrite::Delete { id } => remote.delete_task(*id).await,
            };
            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!("Backend still unavailable for task {}: {:#}", write.id(), e);
                    self.outbox.lock().push_front(write);
                    break;
                }
            }
        }
        if sent > 0 {
            self.save_outbox().await;
        }
        FlushReport {
            sent,
            remaining: self.pending(),
        }
    }
}
