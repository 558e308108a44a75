// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_CATEGORY: &str = "Personal";

/// Identifier of a task.
///
/// Tasks persisted by the remote backend carry the integer it assigned.
/// Tasks created while the backend was unset or failing carry a locally
/// generated string and are never sent to the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum TaskId {
    Remote(i64),
    Local(String),
}

impl TaskId {
    /// Builds a local identifier from the creation time plus a random
    /// component so that two tasks created in the same millisecond differ.
    pub fn local(now: DateTime<Utc>) -> Self {
        let salt: u32 = rand::thread_rng().r#gen();
        TaskId::Local(format!("local-{}-{:08x}", now.timestamp_millis(), salt))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, TaskId::Remote(_))
    }

    pub fn as_remote(&self) -> Option<i64> {
        match self {
            TaskId::Remote(id) => Some(*id),
            TaskId::Local(_) => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Remote(id) => write!(f, "{id}"),
            TaskId::Local(id) => f.write_str(id),
        }
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Task id cannot be empty.".to_string());
        }
        Ok(s.parse::<i64>()
            .map(TaskId::Remote)
            .unwrap_or_else(|_| TaskId::Local(s.to_string())))
    }
}

/// Task priority.
///
/// On the wire priorities use the names stored by the hosted backend
/// ("Baja", "Media", "Alta", "Urgente"). English names are accepted too.
/// Anything else is kept verbatim in `Other` and ranks below every known level.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
    Other(String),
}

impl Priority {
    /// The fixed priority set offered to forms, lowest first.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn rank(&self) -> u8 {
        match self {
            Priority::Urgent => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
            Priority::Other(_) => 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Priority::Low => "Baja",
            Priority::Medium => "Media",
            Priority::High => "Alta",
            Priority::Urgent => "Urgente",
            Priority::Other(raw) => raw,
        }
    }
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Baja" | "Low" => Priority::Low,
            "Media" | "Medium" => Priority::Medium,
            "Alta" | "High" => Priority::High,
            "Urgente" | "Urgent" => Priority::Urgent,
            _ => Priority::Other(raw),
        }
    }
}

impl From<&str> for Priority {
    fn from(raw: &str) -> Self {
        Priority::from(raw.to_string())
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// User preferences. Only `auto_save` and `theme` are mirrored to the
/// hosted backend; the rest live in the local slot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_save: bool,
    pub theme: Theme,
    pub notifications: bool,
    pub animations: bool,
    pub compact_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_save: true,
            theme: Theme::Light,
            notifications: true,
            animations: true,
            compact_mode: false,
        }
    }
}

impl Settings {
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(auto_save) = patch.auto_save {
            self.auto_save = auto_save;
        }
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(notifications) = patch.notifications {
            self.notifications = notifications;
        }
        if let Some(animations) = patch.animations {
            self.animations = animations;
        }
        if let Some(compact_mode) = patch.compact_mode {
            self.compact_mode = compact_mode;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub auto_save: Option<bool>,
    pub theme: Option<Theme>,
    pub notifications: Option<bool>,
    pub animations: Option<bool>,
    pub compact_mode: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    All,
    Active,
    Completed,
    Today,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Created,
    Updated,
    Priority,
    DueDate,
    Alphabetical,
}

/// A to-do item.
///
/// Serialized with camelCase field names; this is both the HTTP shape and the
/// format of the local `tasks` slot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    pub completed: bool,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    /// Estimate in minutes.
    #[serde(default)]
    pub estimated_time: Option<u32>,
    /// Minutes already spent.
    #[serde(default)]
    pub time_spent: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Refreshes `updated_at`, never letting it fall behind `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    /// Sets the completion flag, keeping `completed_at` in step with it.
    pub fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        if completed != self.completed {
            self.completed_at = completed.then_some(now);
        }
        self.completed = completed;
        self.touch(now);
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date.is_some_and(|due| due < now)
    }

    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        self.text.to_lowercase().contains(needle) || self.category.to_lowercase().contains(needle)
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Input for creating a task. Only `text` is required.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub text: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<u32>,
}

impl TaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn into_task(self, id: TaskId, now: DateTime<Utc>) -> Task {
        Task {
            id,
            text: self.text,
            completed: false,
            category: self.category.unwrap_or_else(default_category),
            priority: self.priority.unwrap_or_default(),
            due_date: self.due_date,
            tags: clean_tags(self.tags),
            notes: self.notes.unwrap_or_default(),
            estimated_time: self.estimated_time.filter(|minutes| *minutes > 0),
            time_spent: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Partial update for a task. Absent fields are left untouched; for the
/// nullable fields an explicit `null` clears the value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    #[serde(deserialize_with = "de_double_opt_timestamp")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
    #[serde(deserialize_with = "de_double_opt")]
    pub estimated_time: Option<Option<u32>>,
    pub time_spent: Option<u32>,
}

impl TaskPatch {
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(text) = self.text {
            task.text = text;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(tags) = self.tags {
            task.tags = clean_tags(tags);
        }
        if let Some(notes) = self.notes {
            task.notes = notes;
        }
        if let Some(estimated_time) = self.estimated_time {
            task.estimated_time = estimated_time.filter(|minutes| *minutes > 0);
        }
        if let Some(time_spent) = self.time_spent {
            task.time_spent = time_spent;
        }
        match self.completed {
            Some(completed) => task.set_completed(completed, now),
            None => task.touch(now),
        }
    }
}

/// Trims tags and drops the empty ones, keeping their order.
pub fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Parses the timestamp shapes clients send: RFC 3339, a `datetime-local`
/// value (`2025-03-01T14:30`) or a bare date. Values without an offset are
/// wall-clock times in `offset`; a bare date is midnight there.
pub fn parse_timestamp(raw: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

// Stored and exported tasks carry RFC 3339; anything naive is read as UTC.
fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value, &Utc.fix())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {value}"))),
    }
}

fn de_double_opt_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    de_opt_timestamp(deserializer).map(Some)
}

fn de_double_opt<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
