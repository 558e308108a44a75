// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.

//! Client for the hosted backend, which exposes a PostgREST-style API
//! with a `todos` table and a `user_settings` table.
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset, Utc};
use common::task::parse_timestamp;
use common::{Priority, Settings, Task, TaskDraft, TaskId, Theme};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::RemoteConfig;

const TASKS_TABLE: &str = "todos";
const SETTINGS_TABLE: &str = "user_settings";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A `todos` row as the backend returns it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: i64,
    pub text: String,
    pub completed: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Either a date or a timestamp depending on the column type.
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    /// `offset` reads a `due_date` stored as a plain date.
    pub fn into_task(self, offset: &FixedOffset) -> Task {
        self.into_task_with(TaskDraft::default(), offset)
    }

    /// Builds the task, taking the fields the backend does not store
    /// (tags, notes, estimate) from `draft`.
    pub fn into_task_with(self, draft: TaskDraft, offset: &FixedOffset) -> Task {
        let mut task = draft.into_task(TaskId::Remote(self.id), self.created_at);
        task.text = self.text;
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(priority) = self.priority {
            task.priority = Priority::from(priority);
        }
        task.due_date = self
            .due_date
            .as_deref()
            .and_then(|raw| parse_timestamp(raw, offset));
        task.completed = self.completed;
        task.completed_at = if self.completed {
            Some(self.completed_at.or(self.updated_at).unwrap_or(self.created_at))
        } else {
            None
        };
        task.updated_at = self.updated_at.unwrap_or(self.created_at).max(self.created_at);
        task
    }
}

/// Body of an insert; the backend assigns id and timestamps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewTaskRow {
    pub text: String,
    pub completed: bool,
    pub category: String,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTaskRow {
    pub fn from_draft(draft: &TaskDraft) -> Self {
        Self {
            text: draft.text.clone(),
            completed: false,
            category: draft
                .category
                .clone()
                .unwrap_or_else(|| common::task::DEFAULT_CATEGORY.to_string()),
            priority: draft.priority.clone().unwrap_or_default(),
            due_date: draft.due_date,
        }
    }
}

/// Body of an update: every column the backend keeps for a task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskUpdateRow {
    pub text: String,
    pub completed: bool,
    pub category: String,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskUpdateRow {
    /// Replays a queued update onto a task loaded from the backend.
    pub fn apply_to(&self, task: &mut Task) {
        task.text = self.text.clone();
        task.completed = self.completed;
        task.category = self.category.clone();
        task.priority = self.priority.clone();
        task.due_date = self.due_date;
        task.completed_at = self.completed_at;
        task.updated_at = self.updated_at.max(task.created_at);
    }
}

impl From<&Task> for TaskUpdateRow {
    fn from(task: &Task) -> Self {
        Self {
            text: task.text.clone(),
            completed: task.completed,
            category: task.category.clone(),
            priority: task.priority.clone(),
            due_date: task.due_date,
            completed_at: task.completed_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SettingsRow {
    pub auto_save: bool,
    pub theme: Theme,
}

impl SettingsRow {
    /// Overlays the mirrored fields onto `settings`.
    pub fn apply_to(&self, settings: &mut Settings) {
        settings.auto_save = self.auto_save;
        settings.theme = self.theme;
    }
}

impl From<&Settings> for SettingsRow {
    fn from(settings: &Settings) -> Self {
        Self {
            auto_save: settings.auto_save,
            theme: settings.theme,
        }
    }
}

/// Error body returned by PostgREST.
#[derive(Deserialize, Debug, Default)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Thin async client over the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
}

impl RestBackend {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&config.anon_key).context("anon key is not a valid header")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.anon_key))
                .context("anon key is not a valid header")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// All tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let resp = self
            .client
            .get(self.table_url(TASKS_TABLE))
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await
            .context("list tasks request")?;
        let rows: Vec<TaskRow> = check(resp).await?.json().await.context("parse task rows")?;
        debug!("Fetched {} task rows from the backend.", rows.len());
        Ok(rows)
    }

    pub async fn insert_task(&self, row: &NewTaskRow) -> Result<TaskRow> {
        let resp = self
            .client
            .post(self.table_url(TASKS_TABLE))
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await
            .context("insert task request")?;
        let mut rows: Vec<TaskRow> = check(resp).await?.json().await.context("parse inserted row")?;
        rows.pop().context("backend returned no row for the insert")
    }

    pub async fn update_task(&self, id: i64, row: &TaskUpdateRow) -> Result<()> {
        let resp = self
            .client
            .patch(self.table_url(TASKS_TABLE))
            .query(&[("id", format!("eq.{id}"))])
            .json(row)
            .send()
            .await
            .with_context(|| format!("update task {id} request"))?;
        check(resp).await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: i64) -> Result<()> {
        let resp = self
            .client
            .delete(self.table_url(TASKS_TABLE))
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await
            .with_context(|| format!("delete task {id} request"))?;
        check(resp).await?;
        Ok(())
    }

    pub async fn fetch_settings(&self) -> Result<Option<SettingsRow>> {
        let resp = self
            .client
            .get(self.table_url(SETTINGS_TABLE))
            .query(&[("select", "*"), ("limit", "1")])
            .send()
            .await
            .context("fetch settings request")?;
        let mut rows: Vec<SettingsRow> =
            check(resp).await?.json().await.context("parse settings row")?;
        Ok(rows.pop())
    }

    pub async fn upsert_settings(&self, row: &SettingsRow) -> Result<()> {
        let resp = self
            .client
            .post(self.table_url(SETTINGS_TABLE))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[row])
            .send()
            .await
            .context("upsert settings request")?;
        check(resp).await?;
        Ok(())
    }
}

/// Turns a non-success response into an error, logging what the
/// backend's error code usually means.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let api: ApiError = serde_json::from_str(&body).unwrap_or_default();
    let code = api.code.unwrap_or_default();
    match code.as_str() {
        "42P01" => error!("The backend table does not exist; run the schema setup script."),
        "42501" => error!("The backend refused access; check the row-level security policies."),
        _ => {}
    }
    bail!(
        "backend error: {status} {code} {}",
        api.message.unwrap_or(body)
    );
}
