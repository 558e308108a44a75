// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::sync::Arc;

use crate::handlers;
use crate::service::TaskService;
use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::trace::TraceLayer;

/// Creates and configures the application router.
pub fn create_router(service: Arc<TaskService>) -> Router {
    Router::new()
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/api/tasks/quick", post(handlers::quick_add))
        .route("/api/tasks/bulk-delete", post(handlers::bulk_delete))
        .route("/api/tasks/bulk-complete", post(handlers::bulk_complete))
        .route("/api/tasks/clear-completed", post(handlers::clear_completed))
        .route(
            "/api/tasks/{id}",
            patch(handlers::edit_task).delete(handlers::delete_task),
        )
        .route("/api/tasks/{id}/toggle", patch(handlers::toggle_task))
        .route("/api/tasks/{id}/priority", patch(handlers::set_priority))
        .route("/api/tasks/{id}/due-date", patch(handlers::set_due_date))
        .route(
            "/api/view",
            get(handlers::get_view).patch(handlers::update_view),
        )
        .route(
            "/api/categories",
            get(handlers::list_categories).post(handlers::add_category),
        )
        .route("/api/priorities", get(handlers::list_priorities))
        .route(
            "/api/settings",
            get(handlers::get_settings).patch(handlers::update_settings),
        )
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/views/summary", get(handlers::get_summary))
        .route("/api/views/trend", get(handlers::get_trend))
        .route("/api/views/distribution", get(handlers::get_distribution))
        .route("/api/views/dashboard", get(handlers::get_dashboard))
        .route("/api/views/analytics", get(handlers::get_analytics))
        .route("/api/views/profile", get(handlers::get_profile))
        .route("/api/views/calendar", get(handlers::get_calendar))
        .route("/api/views/week", get(handlers::get_week))
        .route("/api/export", get(handlers::export_tasks))
        .route("/api/import", post(handlers::import_tasks))
        .route("/api/reset", post(handlers::reset_all))
        .route("/api/sync", get(handlers::sync_status))
        .route("/api/sync/flush", post(handlers::flush_sync))
        .layer(TraceLayer::new_for_http())
        // Adds the task service to the application state
        .with_state(service)
}
