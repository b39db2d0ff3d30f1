//! FedMesh Federation API server.

use fedmesh_federation_api::http::{build_router, AppState};
use fedmesh_federation_storage::{FederationBackend, LocalSqliteBackend};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path =
        std::env::var("FEDMESH_DB_PATH").unwrap_or_else(|_| "fedmesh.db".to_string());

    tracing::info!("Using federation database at: {}", db_path);

    let backend = LocalSqliteBackend::new(&db_path);

    if !backend.exists().unwrap_or(false) {
        tracing::warn!("Database does not exist, initializing");
        backend.initialize().expect("Failed to initialize database");
    }

    let state = AppState {
        backend: Arc::new(backend),
    };

    let app = build_router(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Federation API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");
    axum::serve(listener, app)
        .await
        .expect("Server error");
}
