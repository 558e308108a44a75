//! An in-process stand-in for the hosted backend's REST API.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use server::config::RemoteConfig;

#[derive(Default)]
pub struct FakeDb {
    pub rows: Vec<Value>,
    pub settings: Option<Value>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub db: Arc<Mutex<FakeDb>>,
    failing: Arc<AtomicBool>,
}

impl FakeBackend {
    /// Makes every endpoint answer 500 until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn outage(&self) -> Option<Response> {
        self.failing.load(Ordering::SeqCst).then(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "code": "XX000", "message": "backend unavailable" })),
            )
                .into_response()
        })
    }

    /// Adds a row as if another client had created it.
    pub fn seed(&self, text: &str, completed: bool, created_at: &str) -> i64 {
        let mut db = self.db.lock();
        db.next_id += 1;
        let id = db.next_id;
        db.rows.push(json!({
            "id": id,
            "text": text,
            "completed": completed,
            "category": "Personal",
            "priority": "Media",
            "due_date": null,
            "completed_at": null,
            "created_at": created_at,
            "updated_at": created_at,
        }));
        id
    }

    pub fn row(&self, id: i64) -> Option<Value> {
        self.db.lock().rows.iter().find(|row| row["id"] == id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.db.lock().rows.len()
    }
}

fn id_filter(query: &HashMap<String, String>) -> Option<i64> {
    query.get("id")?.strip_prefix("eq.")?.parse().ok()
}

async fn list_todos(State(fake): State<FakeBackend>) -> Response {
    if let Some(outage) = fake.outage() {
        return outage;
    }
    let mut rows = fake.db.lock().rows.clone();
    rows.sort_by(|a, b| b["created_at"].as_str().cmp(&a["created_at"].as_str()));
    Json(rows).into_response()
}

async fn insert_todo(State(fake): State<FakeBackend>, Json(body): Json<Vec<Value>>) -> Response {
    if let Some(outage) = fake.outage() {
        return outage;
    }
    let now = Utc::now().to_rfc3339();
    let mut db = fake.db.lock();
    let mut inserted = Vec::new();
    for mut row in body {
        db.next_id += 1;
        row["id"] = json!(db.next_id);
        row["created_at"] = json!(now);
        row["updated_at"] = json!(now);
        row["completed_at"] = Value::Null;
        db.rows.push(row.clone());
        inserted.push(row);
    }
    (StatusCode::CREATED, Json(inserted)).into_response()
}

async fn update_todo(
    State(fake): State<FakeBackend>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(outage) = fake.outage() {
        return outage;
    }
    let Some(id) = id_filter(&query) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut db = fake.db.lock();
    if let (Some(row), Some(fields)) = (
        db.rows.iter_mut().find(|row| row["id"] == id),
        body.as_object(),
    ) {
        for (key, value) in fields {
            row[key] = value.clone();
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_todo(
    State(fake): State<FakeBackend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(outage) = fake.outage() {
        return outage;
    }
    let Some(id) = id_filter(&query) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    fake.db.lock().rows.retain(|row| row["id"] != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn get_settings(State(fake): State<FakeBackend>) -> Response {
    if let Some(outage) = fake.outage() {
        return outage;
    }
    let rows: Vec<Value> = fake.db.lock().settings.clone().into_iter().collect();
    Json(rows).into_response()
}

async fn upsert_settings(State(fake): State<FakeBackend>, Json(body): Json<Vec<Value>>) -> Response {
    if let Some(outage) = fake.outage() {
        return outage;
    }
    fake.db.lock().settings = body.into_iter().next();
    StatusCode::CREATED.into_response()
}

/// Serves the fake on an ephemeral port and returns its connection details.
pub async fn spawn_fake_backend() -> (FakeBackend, RemoteConfig) {
    let fake = FakeBackend::default();
    let app = Router::new()
        .route(
            "/rest/v1/todos",
            get(list_todos)
                .post(insert_todo)
                .patch(update_todo)
                .delete(delete_todo),
        )
        .route(
            "/rest/v1/user_settings",
            get(get_settings).post(upsert_settings),
        )
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = RemoteConfig {
        url: format!("http://{addr}"),
        anon_key: "test-anon-key".to_string(),
    };
    (fake, config)
}
