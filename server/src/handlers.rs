// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use common::task::parse_timestamp;
use common::validation::{AdvancedForm, QuickForm, ValidationErrors, validate_advanced, validate_quick};
use common::views::{Analytics, CalendarMonth, CalendarWeek, Dashboard, Distribution, Profile, Summary, TrendDay};
use common::{Priority, Settings, SettingsPatch, Stats, Task, TaskId, TaskPatch, ViewState};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, info};

use crate::persistence::{FlushReport, PersistOutcome};
use crate::service::{MutationResult, SyncStatus, TaskService, ViewPatch};

type AppState = State<Arc<TaskService>>;

fn parse_id(raw: &str) -> Result<TaskId, AppError> {
    raw.parse()
        .map_err(|message: String| AppError::new(StatusCode::BAD_REQUEST, &message))
}

/// Single-task mutations on an unknown id answer 404.
fn found(id: &TaskId, result: MutationResult) -> Result<Json<MutationResult>, AppError> {
    if result.affected == 0 {
        error!("Task with ID {} not found.", id);
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            &format!("Task with ID {id} not found."),
        ));
    }
    Ok(Json(result))
}

/// Reads a due date typed by a client. Values without an offset are local
/// to `offset`; blank clears the date.
fn parse_due_date(raw: Option<&str>, offset: &FixedOffset) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_timestamp(raw, offset)
            .map(Some)
            .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "Due date is not a valid date.")),
    }
}

// --- Tasks ---

/// Handler for listing tasks as the current view shows them.
pub async fn list_tasks(State(service): AppState) -> Json<Vec<Task>> {
    let tasks = service.filtered_tasks();
    debug!("Listing {} tasks.", tasks.len());
    Json(tasks)
}

/// Handler for the full task form.
pub async fn create_task(
    State(service): AppState,
    Json(form): Json<AdvancedForm>,
) -> Result<(StatusCode, Json<MutationResult>), AppError> {
    let draft = validate_advanced(form, service.now())?;
    let result = service.add(draft).await;
    info!("Task created with persistence {:?}.", result.persistence);
    Ok((StatusCode::CREATED, Json(result)))
}

/// Handler for the quick-add form.
pub async fn quick_add(
    State(service): AppState,
    Json(form): Json<QuickForm>,
) -> Result<(StatusCode, Json<MutationResult>), AppError> {
    let draft = validate_quick(form)?;
    let result = service.add(draft).await;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Body of `PATCH /api/tasks/{id}`. `dueDate` is taken out of the patch
/// so it can be read in the server's offset.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload {
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<String>>,
    #[serde(flatten)]
    pub patch: TaskPatch,
}

// Tells an explicit `null` apart from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

pub async fn edit_task(
    State(service): AppState,
    Path(id): Path<String>,
    Json(payload): Json<EditPayload>,
) -> Result<Json<MutationResult>, AppError> {
    let id = parse_id(&id)?;
    let mut patch = payload.patch;
    if patch.text.as_deref().is_some_and(|text| text.trim().is_empty()) {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Task text cannot be empty.",
        ));
    }
    if let Some(raw) = payload.due_date {
        patch.due_date = Some(parse_due_date(raw.as_deref(), &service.utc_offset())?);
    }
    let result = service.edit(&id, patch).await;
    found(&id, result)
}

pub async fn toggle_task(
    State(service): AppState,
    Path(id): Path<String>,
) -> Result<Json<MutationResult>, AppError> {
    let id = parse_id(&id)?;
    let result = service.toggle(&id).await;
    found(&id, result)
}

#[derive(Deserialize, Debug)]
pub struct PriorityPayload {
    pub priority: Priority,
}

pub async fn set_priority(
    State(service): AppState,
    Path(id): Path<String>,
    Json(payload): Json<PriorityPayload>,
) -> Result<Json<MutationResult>, AppError> {
    let id = parse_id(&id)?;
    let result = service.set_priority(&id, payload.priority).await;
    found(&id, result)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DueDatePayload {
    /// `null` or a missing field clears the due date.
    #[serde(default)]
    pub due_date: Option<String>,
}

pub async fn set_due_date(
    State(service): AppState,
    Path(id): Path<String>,
    Json(payload): Json<DueDatePayload>,
) -> Result<Json<MutationResult>, AppError> {
    let id = parse_id(&id)?;
    let due_date = parse_due_date(payload.due_date.as_deref(), &service.utc_offset())?;
    let result = service.set_due_date(&id, due_date).await;
    found(&id, result)
}

/// Handler for deleting a task by ID.
pub async fn delete_task(
    State(service): AppState,
    Path(id): Path<String>,
) -> Result<Json<MutationResult>, AppError> {
    let id = parse_id(&id)?;
    debug!("Attempting to delete task with ID: {}", id);
    let result = service.delete(&id).await;
    found(&id, result)
}

#[derive(Deserialize, Debug)]
pub struct IdsPayload {
    pub ids: Vec<TaskId>,
}

pub async fn bulk_delete(
    State(service): AppState,
    Json(payload): Json<IdsPayload>,
) -> Json<MutationResult> {
    let result = service.bulk_delete(&payload.ids).await;
    info!("Bulk delete removed {} tasks.", result.affected);
    Json(result)
}

pub async fn bulk_complete(
    State(service): AppState,
    Json(payload): Json<IdsPayload>,
) -> Json<MutationResult> {
    let result = service.bulk_complete(&payload.ids).await;
    info!("Bulk complete changed {} tasks.", result.affected);
    Json(result)
}

pub async fn clear_completed(State(service): AppState) -> Json<MutationResult> {
    Json(service.clear_completed().await)
}

// --- View, categories, priorities, settings ---

pub async fn get_view(State(service): AppState) -> Json<ViewState> {
    Json(service.view())
}

pub async fn update_view(
    State(service): AppState,
    Json(patch): Json<ViewPatch>,
) -> Json<ViewState> {
    Json(service.update_view(patch))
}

pub async fn list_categories(State(service): AppState) -> Json<Vec<String>> {
    Json(service.categories())
}

#[derive(Deserialize, Debug)]
pub struct CategoryPayload {
    pub name: String,
}

/// 201 when the category is new, 200 when it already existed.
pub async fn add_category(
    State(service): AppState,
    Json(payload): Json<CategoryPayload>,
) -> Result<(StatusCode, Json<Vec<String>>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Category name cannot be empty.",
        ));
    }
    let status = if service.add_category(&payload.name) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(service.categories())))
}

pub async fn list_priorities(State(service): AppState) -> Json<Vec<Priority>> {
    Json(service.priorities())
}

pub async fn get_settings(State(service): AppState) -> Json<Settings> {
    Json(service.settings())
}

#[derive(Serialize, Debug)]
pub struct SettingsResponse {
    pub settings: Settings,
    pub persistence: PersistOutcome,
}

pub async fn update_settings(
    State(service): AppState,
    Json(patch): Json<SettingsPatch>,
) -> Json<SettingsResponse> {
    let (settings, persistence) = service.update_settings(patch).await;
    Json(SettingsResponse {
        settings,
        persistence,
    })
}

// --- Derived views ---

pub async fn get_stats(State(service): AppState) -> Json<Stats> {
    Json(service.stats())
}

pub async fn get_summary(State(service): AppState) -> Json<Summary> {
    Json(service.summary())
}

pub async fn get_trend(State(service): AppState) -> Json<Vec<TrendDay>> {
    Json(service.trend())
}

pub async fn get_distribution(State(service): AppState) -> Json<Distribution> {
    Json(service.distribution())
}

pub async fn get_dashboard(State(service): AppState) -> Json<Dashboard> {
    Json(service.dashboard())
}

pub async fn get_analytics(State(service): AppState) -> Json<Analytics> {
    Json(service.analytics())
}

pub async fn get_profile(State(service): AppState) -> Json<Profile> {
    Json(service.profile())
}

#[derive(Deserialize, Debug, Default)]
pub struct MonthQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

/// Month grid; defaults to the current month.
pub async fn get_calendar(
    State(service): AppState,
    Query(query): Query<MonthQuery>,
) -> Result<Json<CalendarMonth>, AppError> {
    let today = service.today();
    let year = query.year.unwrap_or(today.year());
    let month = query.month.unwrap_or(today.month());
    service
        .calendar_month(year, month)
        .map(Json)
        .ok_or_else(|| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                &format!("{year}-{month} is not a valid month."),
            )
        })
}

#[derive(Deserialize, Debug, Default)]
pub struct WeekQuery {
    pub date: Option<NaiveDate>,
}

/// Sunday-to-Saturday week containing `date`, defaulting to today.
pub async fn get_week(
    State(service): AppState,
    Query(query): Query<WeekQuery>,
) -> Json<CalendarWeek> {
    let date = query.date.unwrap_or_else(|| service.today());
    Json(service.calendar_week(date))
}

// --- Data management ---

pub async fn export_tasks(State(service): AppState) -> Json<Vec<Task>> {
    Json(service.export())
}

pub async fn import_tasks(
    State(service): AppState,
    Json(tasks): Json<Vec<Task>>,
) -> Json<MutationResult> {
    Json(service.import(tasks).await)
}

pub async fn reset_all(State(service): AppState) -> Result<Json<MutationResult>, AppError> {
    let result = service.reset().await?;
    Ok(Json(result))
}

pub async fn sync_status(State(service): AppState) -> Json<SyncStatus> {
    Json(service.sync_status())
}

pub async fn flush_sync(State(service): AppState) -> Json<FlushReport> {
    Json(service.flush().await)
}

// --- Custom Error Handling ---

/// Our custom error type for the application.
#[derive(Debug)]
pub struct AppError {
    code: StatusCode,
    message: String,
    fields: Option<ValidationErrors>,
}

impl AppError {
    fn new(code: StatusCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            fields: None,
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            message: errors.to_string(),
            fields: Some(errors),
        }
    }
}

/// Allows converting an `anyhow::Error` into our `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log the internal error for debugging.
        tracing::error!("Internal server error: {:?}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred.")
    }
}

/// Allows Axum to convert our `AppError` into an HTTP `Response`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            "Responding with error: status_code={}, message={}",
            self.code.as_u16(),
            self.message
        );
        let body = match self.fields {
            Some(errors) => serde_json::json!({ "error": self.message, "fields": errors.fields }),
            None => serde_json::json!({ "error": self.message }),
        };
        (self.code, Json(body)).into_response()
    }
}
