// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Filter, Priority, Settings, SettingsPatch, SortKey, Task, TaskDraft, TaskId, TaskPatch};
use crate::views::local_day;

pub const DEFAULT_CATEGORIES: [&str; 3] = ["Personal", "Trabajo", "Estudio"];

/// Transient list state: which tasks are shown and in what order.
/// Never persisted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub filter: Filter,
    pub sort: SortKey,
    pub search: String,
}

/// Aggregate counters over the whole collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    /// Count per known category, zero counts included.
    pub by_category: BTreeMap<String, usize>,
    /// Count per known priority, keyed by wire name.
    pub by_priority: BTreeMap<String, usize>,
    /// Whole-number percentage.
    pub completion_rate: u32,
}

/// The canonical task collection plus the state the list views read.
///
/// Tasks are kept most-recent-first. Every mutation takes the current time
/// explicitly; operations on an unknown id are no-ops.
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks: Vec<Task>,
    categories: Vec<String>,
    priorities: Vec<Priority>,
    settings: Settings,
    view: ViewState,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            priorities: Priority::ALL.to_vec(),
            settings: Settings::default(),
            view: ViewState::default(),
        }
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(tasks: Vec<Task>, settings: Settings) -> Self {
        let mut store = Self {
            settings,
            ..Self::default()
        };
        store.replace_all(tasks);
        store
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn priorities(&self) -> &[Priority] {
        &self.priorities
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Builds a task from `draft` and puts it at the head of the collection.
    ///
    /// Text is stored as given; form-level validation happens before this.
    pub fn add(&mut self, draft: TaskDraft, id: TaskId, now: DateTime<Utc>) -> &Task {
        self.insert(draft.into_task(id, now))
    }

    /// Puts an already-built task at the head, replacing any task that
    /// carries the same id.
    pub fn insert(&mut self, task: Task) -> &Task {
        self.tasks.retain(|existing| existing.id != task.id);
        self.tasks.insert(0, task);
        &self.tasks[0]
    }

    pub fn toggle(&mut self, id: &TaskId, now: DateTime<Utc>) -> Option<&Task> {
        let task = self.tasks.iter_mut().find(|task| &task.id == id)?;
        task.set_completed(!task.completed, now);
        Some(&*task)
    }

    pub fn edit(&mut self, id: &TaskId, patch: TaskPatch, now: DateTime<Utc>) -> Option<&Task> {
        let task = self.tasks.iter_mut().find(|task| &task.id == id)?;
        patch.apply(task, now);
        Some(&*task)
    }

    pub fn set_priority(
        &mut self,
        id: &TaskId,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Option<&Task> {
        let patch = TaskPatch {
            priority: Some(priority),
            ..TaskPatch::default()
        };
        self.edit(id, patch, now)
    }

    pub fn set_due_date(
        &mut self,
        id: &TaskId,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<&Task> {
        let patch = TaskPatch {
            due_date: Some(due_date),
            ..TaskPatch::default()
        };
        self.edit(id, patch, now)
    }

    pub fn delete(&mut self, id: &TaskId) -> Option<Task> {
        let index = self.tasks.iter().position(|task| &task.id == id)?;
        Some(self.tasks.remove(index))
    }

    /// Removes every listed task and returns the removed ones.
    pub fn bulk_delete(&mut self, ids: &[TaskId]) -> Vec<Task> {
        let wanted: HashSet<&TaskId> = ids.iter().collect();
        let (removed, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| wanted.contains(&task.id));
        self.tasks = kept;
        removed
    }

    /// Marks the listed tasks completed. Tasks already completed keep their
    /// original `completed_at`. Returns the ids that actually changed.
    pub fn bulk_complete(&mut self, ids: &[TaskId], now: DateTime<Utc>) -> Vec<TaskId> {
        let wanted: HashSet<&TaskId> = ids.iter().collect();
        self.tasks
            .iter_mut()
            .filter(|task| !task.completed && wanted.contains(&task.id))
            .map(|task| {
                task.set_completed(true, now);
                task.id.clone()
            })
            .collect()
    }

    /// Removes every completed task and returns the removed ones.
    pub fn clear_completed(&mut self) -> Vec<Task> {
        let (removed, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| task.completed);
        self.tasks = kept;
        removed
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.view.filter = filter;
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        self.view.sort = sort;
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.view.search = search.into();
    }

    /// Appends a category unless it is already known (case-sensitive).
    pub fn add_category(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.categories.contains(&name) {
            return false;
        }
        self.categories.push(name);
        true
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) -> &Settings {
        self.settings.merge(patch);
        &self.settings
    }

    /// Replaces the whole collection, dropping later duplicates of an id.
    /// Returns how many tasks were kept.
    pub fn replace_all(&mut self, tasks: Vec<Task>) -> usize {
        let mut seen = HashSet::new();
        self.tasks = tasks
            .into_iter()
            .filter(|task| seen.insert(task.id.clone()))
            .collect();
        self.tasks.len()
    }

    pub fn export(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    /// Clears all tasks and restores default settings and categories.
    pub fn reset(&mut self) {
        let view = std::mem::take(&mut self.view);
        *self = Self {
            view,
            ..Self::default()
        };
    }

    /// Applies the current filter, then the search, then the sort, over a
    /// copy of the collection. `now` decides what "today" means.
    pub fn filtered_tasks(&self, now: DateTime<FixedOffset>) -> Vec<Task> {
        let today = now.date_naive();
        let needle = self.view.search.to_lowercase();

        let mut filtered: Vec<Task> = self
            .tasks
            .iter()
            .filter(|task| match self.view.filter {
                Filter::All => true,
                Filter::Active => !task.completed,
                Filter::Completed => task.completed,
                Filter::Today => task
                    .due_date
                    .is_some_and(|due| local_day(due, now.offset()) == today),
            })
            .filter(|task| needle.is_empty() || task.matches_search(&needle))
            .cloned()
            .collect();

        sort_tasks(&mut filtered, self.view.sort);
        filtered
    }

    pub fn stats(&self) -> Stats {
        let total = self.tasks.len();
        let completed = self.tasks.iter().filter(|task| task.completed).count();

        let by_category = self
            .categories
            .iter()
            .map(|category| {
                let count = self.tasks.iter().filter(|t| &t.category == category).count();
                (category.clone(), count)
            })
            .collect();

        let by_priority = self
            .priorities
            .iter()
            .map(|priority| {
                let count = self.tasks.iter().filter(|t| &t.priority == priority).count();
                (priority.as_str().to_string(), count)
            })
            .collect();

        Stats {
            total,
            completed,
            active: total - completed,
            by_category,
            by_priority,
            completion_rate: percentage(completed, total),
        }
    }
}

/// `part / whole * 100`, rounded, or 0 when `whole` is 0.
pub fn percentage(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part as f64 / whole as f64 * 100.0).round() as u32
}

/// Stable sort of `tasks` by the given key.
pub fn sort_tasks(tasks: &mut [Task], sort: SortKey) {
    match sort {
        SortKey::Created => tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Updated => tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        SortKey::Priority => tasks.sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank())),
        SortKey::DueDate => tasks.sort_by(|a, b| match (a.due_date, b.due_date) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(&y),
        }),
        SortKey::Alphabetical => tasks.sort_by(|a, b| {
            collation_key(&a.text)
                .cmp(&collation_key(&b.text))
                .then_with(|| a.text.cmp(&b.text))
        }),
    }
}

/// Case- and accent-insensitive key for alphabetical ordering of the
/// Latin-script text users type ("árbol" sorts with "arbol").
///
/// Only the accented vowels of Spanish, French, Portuguese and German plus
/// `ñ` and `ç` are folded. Other marks (`ø`, `ł`, `ß`, combining
/// sequences) keep their code point order, and this is no substitute for
/// locale-aware collation.
fn collation_key(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
