mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use common::{SettingsPatch, TaskDraft, TaskId, Theme};
use serde_json::json;
use server::config::RemoteConfig;
use server::local::LocalStore;
use server::persistence::{LoadSource, PersistOutcome, Persistence};
use server::remote::RestBackend;
use server::service::TaskService;
use support::{FakeBackend, spawn_fake_backend};

const QUIET: Duration = Duration::from_millis(50);

async fn service_with(config: &RemoteConfig, local: LocalStore) -> Arc<TaskService> {
    let remote = RestBackend::new(config).unwrap();
    TaskService::bootstrap(
        Persistence::new(Some(remote), local),
        FixedOffset::east_opt(0).unwrap(),
        QUIET,
    )
    .await
}

async fn connected() -> (FakeBackend, Arc<TaskService>) {
    let (fake, config) = spawn_fake_backend().await;
    let service = service_with(&config, LocalStore::in_memory().await.unwrap()).await;
    (fake, service)
}

/// A SQLite file that outlives a service, to simulate a restart.
fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("taskdeck.db").display())
}

/// Polls until the outbox is empty or the deadline passes.
async fn wait_for_empty_outbox(service: &TaskService, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if service.sync_status().pending_writes == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_add_takes_backend_id() {
    // Arrange
    let (fake, service) = connected().await;
    let draft = TaskDraft {
        tags: vec!["home".to_string()],
        ..TaskDraft::new("Buy milk")
    };

    // Act
    let result = service.add(draft).await;

    // Assert
    assert_eq!(result.persistence, PersistOutcome::Remote);
    let task = result.task.unwrap();
    assert_eq!(task.id, TaskId::Remote(1));
    assert_eq!(task.tags, vec!["home".to_string()]);
    assert_eq!(fake.row(1).unwrap()["text"], "Buy milk");
    assert_eq!(fake.row(1).unwrap()["priority"], "Media");
}

#[tokio::test]
async fn test_startup_prefers_backend_and_keeps_local_only_tasks() {
    // Arrange
    let (fake, config) = spawn_fake_backend().await;
    fake.seed("Older", false, "2025-03-01T09:00:00+00:00");
    fake.seed("Newer", true, "2025-03-02T09:00:00+00:00");
    fake.db.lock().settings = Some(json!({ "auto_save": false, "theme": "dark" }));

    let local = LocalStore::in_memory().await.unwrap();
    let stale = TaskDraft::new("Stale local").into_task(TaskId::local(Utc::now()), Utc::now());
    local.save_tasks(&[stale]).await.unwrap();

    // Act
    let service = service_with(&config, local).await;

    // Assert
    let status = service.sync_status();
    assert_eq!(status.loaded_from, LoadSource::Remote);
    assert!(!status.auto_save);
    let tasks = service.tasks();
    let texts: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["Stale local", "Newer", "Older"]);
    assert!(!tasks[0].id.is_remote());
    assert!(tasks[1].completed_at.is_some());
    assert_eq!(service.settings().theme, Theme::Dark);
    assert_eq!(*service.subscribe_theme().borrow(), Theme::Dark);
}

#[tokio::test]
async fn test_backend_down_at_startup_uses_local_snapshot() {
    // Arrange
    let (fake, config) = spawn_fake_backend().await;
    fake.set_failing(true);
    let local = LocalStore::in_memory().await.unwrap();
    let saved = TaskDraft::new("Saved offline").into_task(TaskId::Remote(9), Utc::now());
    local.save_tasks(&[saved.clone()]).await.unwrap();

    // Act
    let service = service_with(&config, local).await;

    // Assert
    assert_eq!(service.sync_status().loaded_from, LoadSource::Local);
    assert_eq!(service.tasks(), vec![saved]);
}

#[tokio::test]
async fn test_unreachable_backend_starts_empty() {
    let config = RemoteConfig {
        url: "http://127.0.0.1:9".to_string(),
        anon_key: "key".to_string(),
    };
    let service = service_with(&config, LocalStore::in_memory().await.unwrap()).await;

    assert_eq!(service.sync_status().loaded_from, LoadSource::Empty);
    assert!(service.sync_status().remote_configured);

    // New tasks still work and get local ids.
    let result = service.add(TaskDraft::new("Offline")).await;
    assert_eq!(result.persistence, PersistOutcome::LocalFallback);
    assert!(matches!(result.task.unwrap().id, TaskId::Local(_)));
}

#[tokio::test]
async fn test_failed_insert_keeps_task_local_forever() {
    // Arrange
    let (fake, service) = connected().await;
    fake.set_failing(true);
    let task = service.add(TaskDraft::new("Written offline")).await.task.unwrap();
    assert!(!task.id.is_remote());

    // Act: the backend is back, but local ids are never sent
    fake.set_failing(false);
    let result = service.toggle(&task.id).await;

    // Assert
    assert_eq!(result.persistence, PersistOutcome::LocalFallback);
    assert_eq!(service.sync_status().pending_writes, 0);
    assert_eq!(fake.row_count(), 0);
}

#[tokio::test]
async fn test_offline_task_survives_restart_once_backend_is_back() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (fake, config) = spawn_fake_backend().await;
    fake.seed("From backend", false, "2025-03-01T09:00:00+00:00");
    fake.set_failing(true);
    let service = service_with(&config, LocalStore::open(&database_url(&dir)).await.unwrap()).await;
    let offline = service.add(TaskDraft::new("Written offline")).await.task.unwrap();
    drop(service);

    // Act
    fake.set_failing(false);
    let restarted =
        service_with(&config, LocalStore::open(&database_url(&dir)).await.unwrap()).await;

    // Assert
    assert_eq!(restarted.sync_status().loaded_from, LoadSource::Remote);
    let tasks = restarted.tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, offline.id);
    assert_eq!(tasks[0].text, "Written offline");
    assert_eq!(tasks[1].text, "From backend");
    assert_eq!(fake.row_count(), 1);
}

#[tokio::test]
async fn test_queued_update_survives_restart() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (fake, config) = spawn_fake_backend().await;
    let service = service_with(&config, LocalStore::open(&database_url(&dir)).await.unwrap()).await;
    let id = service.add(TaskDraft::new("Sync me later")).await.task.unwrap().id;
    fake.set_failing(true);
    service.toggle(&id).await;
    assert_eq!(service.sync_status().pending_writes, 1);
    drop(service);

    // Act
    fake.set_failing(false);
    let restarted =
        service_with(&config, LocalStore::open(&database_url(&dir)).await.unwrap()).await;

    // Assert: the backend row is stale, the restored queue wins
    assert_eq!(restarted.sync_status().pending_writes, 1);
    assert!(restarted.get(&id).unwrap().completed);
    assert_eq!(fake.row(1).unwrap()["completed"], false);

    // Act
    let report = restarted.flush().await;

    // Assert
    assert_eq!(report.sent, 1);
    assert_eq!(restarted.sync_status().pending_writes, 0);
    assert_eq!(fake.row(1).unwrap()["completed"], true);
}

#[tokio::test]
async fn test_queued_delete_survives_restart() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (fake, config) = spawn_fake_backend().await;
    let service = service_with(&config, LocalStore::open(&database_url(&dir)).await.unwrap()).await;
    let id = service.add(TaskDraft::new("Gone soon")).await.task.unwrap().id;
    fake.set_failing(true);
    service.delete(&id).await;
    drop(service);

    // Act
    fake.set_failing(false);
    let restarted =
        service_with(&config, LocalStore::open(&database_url(&dir)).await.unwrap()).await;

    // Assert
    assert!(restarted.tasks().is_empty());
    assert_eq!(restarted.flush().await.sent, 1);
    assert_eq!(fake.row_count(), 0);
}

#[tokio::test]
async fn test_failed_update_is_queued_then_flushed() {
    // Arrange
    let (fake, service) = connected().await;
    let id = service.add(TaskDraft::new("Sync me")).await.task.unwrap().id;

    // Act: toggle while the backend is down
    fake.set_failing(true);
    let result = service.toggle(&id).await;

    // Assert: kept locally and queued
    assert_eq!(result.persistence, PersistOutcome::LocalFallback);
    assert_eq!(service.sync_status().pending_writes, 1);
    assert_eq!(fake.row(1).unwrap()["completed"], false);

    // Act: flush after recovery
    fake.set_failing(false);
    let report = service.flush().await;

    // Assert
    assert_eq!(report.sent, 1);
    assert_eq!(report.remaining, 0);
    let row = fake.row(1).unwrap();
    assert_eq!(row["completed"], true);
    assert!(row["completed_at"].is_string());
}

#[tokio::test]
async fn test_flush_stops_while_backend_is_down() {
    let (fake, service) = connected().await;
    let a = service.add(TaskDraft::new("a")).await.task.unwrap().id;
    let b = service.add(TaskDraft::new("b")).await.task.unwrap().id;

    fake.set_failing(true);
    service.toggle(&a).await;
    service.delete(&b).await;
    assert_eq!(service.sync_status().pending_writes, 2);

    let report = service.flush().await;
    assert_eq!(report.sent, 0);
    assert_eq!(report.remaining, 2);

    fake.set_failing(false);
    let report = service.flush().await;
    assert_eq!(report.sent, 2);
    assert_eq!(fake.row_count(), 1);
    assert_eq!(fake.row(1).unwrap()["completed"], true);
}

#[tokio::test]
async fn test_worker_flushes_after_quiet_period() {
    // Arrange
    let (fake, service) = connected().await;
    service.spawn_sync_worker();
    let id = service.add(TaskDraft::new("Eventually synced")).await.task.unwrap().id;

    // Act
    fake.set_failing(true);
    service.set_priority(&id, common::Priority::Urgent).await;
    assert_eq!(service.sync_status().pending_writes, 1);
    fake.set_failing(false);

    // Assert
    assert!(wait_for_empty_outbox(&service, Duration::from_secs(3)).await);
    assert_eq!(fake.row(1).unwrap()["priority"], "Urgente");
}

#[tokio::test]
async fn test_worker_holds_queue_while_auto_save_is_off() {
    // Arrange
    let (fake, service) = connected().await;
    service.spawn_sync_worker();
    let id = service.add(TaskDraft::new("Held back")).await.task.unwrap().id;
    service
        .update_settings(SettingsPatch {
            auto_save: Some(false),
            ..SettingsPatch::default()
        })
        .await;

    // Act
    fake.set_failing(true);
    service.toggle(&id).await;
    fake.set_failing(false);
    tokio::time::sleep(QUIET * 6).await;

    // Assert
    assert_eq!(service.sync_status().pending_writes, 1);
    assert_eq!(fake.row(1).unwrap()["completed"], false);
}

#[tokio::test]
async fn test_settings_are_mirrored_to_backend() {
    let (fake, service) = connected().await;

    let (_, outcome) = service
        .update_settings(SettingsPatch {
            theme: Some(Theme::Dark),
            animations: Some(false),
            ..SettingsPatch::default()
        })
        .await;

    assert_eq!(outcome, PersistOutcome::Remote);
    assert_eq!(
        fake.db.lock().settings,
        Some(json!({ "auto_save": true, "theme": "dark" }))
    );
}

#[tokio::test]
async fn test_reset_deletes_backend_rows() {
    let (fake, service) = connected().await;
    service.add(TaskDraft::new("a")).await;
    service.add(TaskDraft::new("b")).await;
    assert_eq!(fake.row_count(), 2);

    let result = service.reset().await.unwrap();

    assert_eq!(result.affected, 2);
    assert_eq!(result.persistence, PersistOutcome::Remote);
    assert_eq!(fake.row_count(), 0);
    assert!(service.tasks().is_empty());
}
