// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use common::views::{self, Analytics, CalendarMonth, CalendarWeek, Dashboard, Distribution, Profile, Summary, TrendDay};
use common::{
    Filter, Priority, Settings, SettingsPatch, SortKey, Stats, Task, TaskDraft, TaskId, TaskPatch,
    TaskStore, Theme, ViewState,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::persistence::{FlushReport, LoadSource, Persistence, PersistOutcome};

/// Result of a task mutation as reported to callers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MutationResult {
    pub affected: usize,
    pub persistence: PersistOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl MutationResult {
    fn unchanged() -> Self {
        Self {
            affected: 0,
            persistence: PersistOutcome::Unchanged,
            task: None,
        }
    }

    fn one(task: Task, persistence: PersistOutcome) -> Self {
        Self {
            affected: 1,
            persistence,
            task: Some(task),
        }
    }

    fn many(affected: usize, persistence: PersistOutcome) -> Self {
        Self {
            affected,
            persistence,
            task: None,
        }
    }
}

/// Partial update of the list view; missing fields are left alone.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ViewPatch {
    pub filter: Option<Filter>,
    pub sort: Option<SortKey>,
    pub search: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub remote_configured: bool,
    pub loaded_from: LoadSource,
    pub pending_writes: usize,
    pub auto_save: bool,
}

/// The task store plus everything that keeps it durable.
///
/// All state lives behind one lock that is never held across an await:
/// each operation mutates in memory, takes a snapshot, releases the lock
/// and only then talks to storage.
pub struct TaskService {
    store: RwLock<TaskStore>,
    persistence: Persistence,
    loaded_from: RwLock<LoadSource>,
    utc_offset: FixedOffset,
    sync_quiet_period: Duration,
    changes: Notify,
    theme: watch::Sender<Theme>,
}

impl TaskService {
    pub fn new(persistence: Persistence, utc_offset: FixedOffset, sync_quiet_period: Duration) -> Self {
        let (theme, _) = watch::channel(Theme::default());
        Self {
            store: RwLock::new(TaskStore::new()),
            persistence: persistence.with_utc_offset(utc_offset),
            loaded_from: RwLock::new(LoadSource::Empty),
            utc_offset,
            sync_quiet_period,
            changes: Notify::new(),
            theme,
        }
    }

    /// Builds the service and fills it from storage.
    pub async fn bootstrap(
        persistence: Persistence,
        utc_offset: FixedOffset,
        sync_quiet_period: Duration,
    ) -> Arc<Self> {
        let service = Arc::new(Self::new(persistence, utc_offset, sync_quiet_period));
        service.load().await;
        service
    }

    /// Replaces the in-memory state with whatever storage holds.
    pub async fn load(&self) -> LoadSource {
        let loaded = self.persistence.load().await;
        let theme = loaded.settings.theme;
        {
            let mut store = self.store.write();
            *store = TaskStore::with_state(loaded.tasks, loaded.settings);
        }
        *self.loaded_from.write() = loaded.source;
        self.theme.send_replace(theme);
        info!("Task collection loaded from {:?}.", loaded.source);
        loaded.source
    }

    /// The current time in the configured offset, which decides calendar days.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.utc_offset)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    // Restarts the sync worker's quiet period.
    fn changed(&self) {
        self.changes.notify_one();
    }

    // ---- Tasks ----

    pub fn tasks(&self) -> Vec<Task> {
        self.store.read().export()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.store.read().get(id).cloned()
    }

    pub async fn add(&self, draft: TaskDraft) -> MutationResult {
        let now = Utc::now();
        // The backend assigns the id when it takes the insert.
        let result = match self.persistence.insert_remote(&draft).await {
            Some(task) => {
                let task = self.store.write().insert(task).clone();
                MutationResult::one(task, PersistOutcome::Remote)
            }
            None => {
                let (task, snapshot) = {
                    let mut store = self.store.write();
                    let task = store.add(draft, TaskId::local(now), now).clone();
                    (task, store.export())
                };
                let outcome = self.persistence.mirror_local(&snapshot).await;
                MutationResult::one(task, outcome)
            }
        };
        if let Some(task) = &result.task {
            debug!("Added task {}.", task.id);
        }
        self.changed();
        result
    }

    /// Applies `update` to one task and persists it if it changed.
    async fn update_one(
        &self,
        update: impl FnOnce(&mut TaskStore, DateTime<Utc>) -> Option<Task>,
    ) -> MutationResult {
        let (task, snapshot) = {
            let mut store = self.store.write();
            match update(&mut *store, Utc::now()) {
                Some(task) => (task, store.export()),
                None => return MutationResult::unchanged(),
            }
        };
        let outcome = self
            .persistence
            .write_tasks(std::slice::from_ref(&task), &snapshot)
            .await;
        self.changed();
        MutationResult::one(task, outcome)
    }

    pub async fn toggle(&self, id: &TaskId) -> MutationResult {
        self.update_one(|store, now| store.toggle(id, now).cloned()).await
    }

    pub async fn edit(&self, id: &TaskId, patch: TaskPatch) -> MutationResult {
        self.update_one(|store, now| store.edit(id, patch, now).cloned()).await
    }

    pub async fn set_priority(&self, id: &TaskId, priority: Priority) -> MutationResult {
        self.update_one(|store, now| store.set_priority(id, priority, now).cloned())
            .await
    }

    pub async fn set_due_date(&self, id: &TaskId, due_date: Option<DateTime<Utc>>) -> MutationResult {
        self.update_one(|store, now| store.set_due_date(id, due_date, now).cloned())
            .await
    }

    /// Persists the removal of `removed`, already taken out of the store.
    async fn finish_removal(&self, removed: Vec<Task>, snapshot: Vec<Task>) -> MutationResult {
        if removed.is_empty() {
            return MutationResult::unchanged();
        }
        let ids: Vec<TaskId> = removed.iter().map(|task| task.id.clone()).collect();
        let outcome = self.persistence.delete_tasks(&ids, &snapshot).await;
        self.changed();
        MutationResult::many(ids.len(), outcome)
    }

    pub async fn delete(&self, id: &TaskId) -> MutationResult {
        let (removed, snapshot) = {
            let mut store = self.store.write();
            let removed: Vec<Task> = store.delete(id).into_iter().collect();
            (removed, store.export())
        };
        self.finish_removal(removed, snapshot).await
    }

    pub async fn bulk_delete(&self, ids: &[TaskId]) -> MutationResult {
        let (removed, snapshot) = {
            let mut store = self.store.write();
            let removed = store.bulk_delete(ids);
            (removed, store.export())
        };
        self.finish_removal(removed, snapshot).await
    }

    pub async fn clear_completed(&self) -> MutationResult {
        let (removed, snapshot) = {
            let mut store = self.store.write();
            let removed = store.clear_completed();
            (removed, store.export())
        };
        self.finish_removal(removed, snapshot).await
    }

    pub async fn bulk_complete(&self, ids: &[TaskId]) -> MutationResult {
        let (changed, snapshot) = {
            let mut store = self.store.write();
            let changed_ids = store.bulk_complete(ids, Utc::now());
            let changed: Vec<Task> = changed_ids
                .iter()
                .filter_map(|id| store.get(id).cloned())
                .collect();
            (changed, store.export())
        };
        if changed.is_empty() {
            return MutationResult::unchanged();
        }
        let outcome = self.persistence.write_tasks(&changed, &snapshot).await;
        self.changed();
        MutationResult::many(changed.len(), outcome)
    }

    /// Replaces the whole collection with imported tasks. Imports are kept
    /// in the local store only; the backend is not rewritten.
    pub async fn import(&self, tasks: Vec<Task>) -> MutationResult {
        // Duplicate ids are dropped by the store, keeping the first.
        let (kept, snapshot) = {
            let mut store = self.store.write();
            let kept = store.replace_all(tasks);
            (kept, store.export())
        };
        let outcome = self.persistence.mirror_local(&snapshot).await;
        info!("Imported {} tasks.", kept);
        self.changed();
        MutationResult::many(kept, outcome)
    }

    pub fn export(&self) -> Vec<Task> {
        self.store.read().export()
    }

    /// Deletes every task and restores default settings and categories.
    ///
    /// Fails when the local store cannot be cleared. The in-memory reset
    /// has happened by then.
    pub async fn reset(&self) -> anyhow::Result<MutationResult> {
        let removed: Vec<TaskId> = {
            let mut store = self.store.write();
            let ids = store.tasks().iter().map(|task| task.id.clone()).collect();
            store.reset();
            ids
        };
        self.theme.send_replace(Theme::default());
        let mut outcome = self.persistence.clear(&removed).await?;
        // Clearing dropped the local settings slot; the backend row needs
        // an explicit write.
        if self.persistence.has_remote() {
            outcome = outcome.worst(self.persistence.save_settings(&Settings::default()).await);
        }
        info!("Reset removed {} tasks.", removed.len());
        Ok(MutationResult::many(removed.len(), outcome))
    }

    // ---- List view ----

    pub fn view(&self) -> ViewState {
        self.store.read().view().clone()
    }

    pub fn update_view(&self, patch: ViewPatch) -> ViewState {
        let mut store = self.store.write();
        if let Some(filter) = patch.filter {
            store.set_filter(filter);
        }
        if let Some(sort) = patch.sort {
            store.set_sort(sort);
        }
        if let Some(search) = patch.search {
            store.set_search(search);
        }
        store.view().clone()
    }

    /// The tasks the current view shows, in display order.
    pub fn filtered_tasks(&self) -> Vec<Task> {
        let now = self.now();
        self.store.read().filtered_tasks(now)
    }

    // ---- Categories, priorities, settings ----

    pub fn categories(&self) -> Vec<String> {
        self.store.read().categories().to_vec()
    }

    /// Returns false for a blank name or one already present.
    pub fn add_category(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.store.write().add_category(name)
    }

    pub fn priorities(&self) -> Vec<Priority> {
        self.store.read().priorities().to_vec()
    }

    pub fn settings(&self) -> Settings {
        self.store.read().settings().clone()
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> (Settings, PersistOutcome) {
        let settings = self.store.write().update_settings(patch).clone();
        self.theme.send_if_modified(|theme| {
            let modified = *theme != settings.theme;
            *theme = settings.theme;
            modified
        });
        let outcome = self.persistence.save_settings(&settings).await;
        (settings, outcome)
    }

    /// Receives the current theme and every later change.
    pub fn subscribe_theme(&self) -> watch::Receiver<Theme> {
        self.theme.subscribe()
    }

    // ---- Derived views ----

    pub fn stats(&self) -> Stats {
        self.store.read().stats()
    }

    pub fn summary(&self) -> Summary {
        let now = self.now();
        views::summary(self.store.read().tasks(), now)
    }

    pub fn trend(&self) -> Vec<TrendDay> {
        let now = self.now();
        views::completion_trend(self.store.read().tasks(), now)
    }

    /// `None` for an invalid month.
    pub fn calendar_month(&self, year: i32, month: u32) -> Option<CalendarMonth> {
        let now = self.now();
        views::calendar_month(self.store.read().tasks(), year, month, now)
    }

    pub fn calendar_week(&self, date: NaiveDate) -> CalendarWeek {
        let now = self.now();
        views::calendar_week(self.store.read().tasks(), date, now)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub fn distribution(&self) -> Distribution {
        views::distribution(self.store.read().tasks())
    }

    pub fn dashboard(&self) -> Dashboard {
        let now = self.now();
        views::dashboard(self.store.read().tasks(), now)
    }

    pub fn analytics(&self) -> Analytics {
        let now = self.now();
        views::analytics(self.store.read().tasks(), now)
    }

    pub fn profile(&self) -> Profile {
        let now = self.now();
        views::profile(self.store.read().tasks(), now)
    }

    // ---- Sync ----

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            remote_configured: self.persistence.has_remote(),
            loaded_from: *self.loaded_from.read(),
            pending_writes: self.persistence.pending(),
            auto_save: self.store.read().settings().auto_save,
        }
    }

    /// Retries queued backend writes now.
    pub async fn flush(&self) -> FlushReport {
        self.persistence.flush_outbox().await
    }

    /// Starts the background worker that retries queued writes once task
    /// changes have been quiet for the configured period. Each change
    /// restarts the wait. Nothing is flushed while auto-save is off.
    pub fn spawn_sync_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                service.changes.notified().await;
                // Wait out the burst.
                loop {
                    tokio::select! {
                        _ = service.changes.notified() => continue,
                        _ = tokio::time::sleep(service.sync_quiet_period) => break,
                    }
                }

                if !service.store.read().settings().auto_save {
                    debug!("Auto-save is off, leaving {} queued writes.", service.persistence.pending());
                    continue;
                }
                if service.persistence.pending() == 0 {
                    continue;
                }
                let report = service.flush().await;
                info!(
                    "Sync pass sent {} queued writes, {} remaining.",
                    report.sent, report.remaining
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalStore;

    async fn service() -> Arc<TaskService> {
        let persistence = Persistence::new(None, LocalStore::in_memory().await.unwrap());
        TaskService::bootstrap(
            persistence,
            FixedOffset::east_opt(0).unwrap(),
            Duration::from_millis(20),
        )
        .await
    }

    #[tokio::test]
    async fn test_local_only_add_gets_local_id() {
        let service = service().await;
        let result = service.add(TaskDraft::new("Buy milk")).await;
        assert_eq!(result.affected, 1);
        assert_eq!(result.persistence, PersistOutcome::LocalFallback);
        let task = result.task.unwrap();
        assert!(!task.id.is_remote());
        assert_eq!(service.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_unchanged() {
        let service = service().await;
        let missing = TaskId::Remote(404);
        assert_eq!(service.toggle(&missing).await, MutationResult::unchanged());
        assert_eq!(service.delete(&missing).await, MutationResult::unchanged());
        assert_eq!(
            service.bulk_complete(&[missing]).await,
            MutationResult::unchanged()
        );
    }

    #[tokio::test]
    async fn test_changes_survive_reload() {
        let service = service().await;
        let id = service.add(TaskDraft::new("Read")).await.task.unwrap().id;
        service.toggle(&id).await;
        service.add(TaskDraft::new("Write")).await;

        // Reload from the same local store.
        assert_eq!(service.load().await, LoadSource::Local);
        let tasks = service.tasks();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().find(|t| t.id == id).unwrap().completed);
    }

    #[tokio::test]
    async fn test_bulk_operations_report_counts() {
        let service = service().await;
        let a = service.add(TaskDraft::new("a")).await.task.unwrap().id;
        let b = service.add(TaskDraft::new("b")).await.task.unwrap().id;
        service.add(TaskDraft::new("c")).await;

        assert_eq!(service.bulk_complete(&[a.clone(), b.clone()]).await.affected, 2);
        assert_eq!(service.clear_completed().await.affected, 2);
        assert_eq!(service.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_view_patch_leaves_missing_fields() {
        let service = service().await;
        service.update_view(ViewPatch {
            filter: Some(Filter::Active),
            ..ViewPatch::default()
        });
        let view = service.update_view(ViewPatch {
            search: Some("milk".to_string()),
            ..ViewPatch::default()
        });
        assert_eq!(view.filter, Filter::Active);
        assert_eq!(view.search, "milk");
    }

    #[tokio::test]
    async fn test_theme_changes_are_broadcast() {
        let service = service().await;
        let mut theme = service.subscribe_theme();
        assert_eq!(*theme.borrow(), Theme::Light);

        let (settings, outcome) = service
            .update_settings(SettingsPatch {
                theme: Some(Theme::Dark),
                ..SettingsPatch::default()
            })
            .await;
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(outcome, PersistOutcome::LocalFallback);
        assert!(theme.has_changed().unwrap());
        assert_eq!(*theme.borrow_and_update(), Theme::Dark);
    }

    #[tokio::test]
    async fn test_blank_category_is_refused() {
        let service = service().await;
        assert!(!service.add_category("   "));
        assert!(service.add_category(" Hogar "));
        assert!(!service.add_category("Hogar"));
        assert!(service.categories().contains(&"Hogar".to_string()));
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let service = service().await;
        service.add(TaskDraft::new("a")).await;
        service
            .update_settings(SettingsPatch {
                theme: Some(Theme::Dark),
                ..SettingsPatch::default()
            })
            .await;

        let result = service.reset().await.unwrap();
        assert_eq!(result.affected, 1);
        assert!(service.tasks().is_empty());
        assert_eq!(service.settings(), Settings::default());
        assert_eq!(service.load().await, LoadSource::Empty);
    }
}
