// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use anyhow::Context;
use axum::http::HeaderName;
use server::config::AppConfig;
use server::local::LocalStore;
use server::persistence::Persistence;
use server::remote::RestBackend;
use server::routes;
use server::service::TaskService;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting up the server...");

    let config = AppConfig::from_env()?;

    let local = match LocalStore::open(&config.database_url).await {
        Ok(local) => {
            tracing::info!("Database connection was made successfully.");
            local
        }
        Err(e) => {
            tracing::error!("Failed to connect with the database: {:?}", e);
            std::process::exit(1);
        }
    };

    let remote = match &config.remote {
        Some(remote) => {
            tracing::info!("Syncing with the hosted backend at {}", remote.url);
            Some(RestBackend::new(remote)?)
        }
        None => {
            tracing::info!("No hosted backend configured; tasks stay in local storage.");
            None
        }
    };

    let service = TaskService::bootstrap(
        Persistence::new(remote, local),
        config.utc_offset,
        config.sync_quiet_period,
    )
    .await;
    let _sync_worker = service.spawn_sync_worker();

    let mut theme = service.subscribe_theme();
    tokio::spawn(async move {
        while theme.changed().await.is_ok() {
            let current = *theme.borrow_and_update();
            tracing::info!("Theme switched to {:?}.", current);
        }
    });

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
        ])
        .allow_origin(Any);

    let app = routes::create_router(service).layer(cors);

    tracing::info!("The server listens on http://{}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.addr))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
