use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use api::{create_api_routes, AppState};
use shared_config::WorkspaceConfig;
use store::{DeviceStore, SqliteStore, TaskStore};

#[tokio::main]
async fn main() {
    let config = WorkspaceConfig::load().unwrap_or_else(|e| {
        eprintln!("failed to load config: {e}, using defaults");
        WorkspaceConfig::default()
    });
    let _log_guard = shared_config::init_logging(&config.logging);

    std::fs::create_dir_all(config.cache.input_archive_dir()).ok();
    std::fs::create_dir_all(config.cache.output_archive_dir()).ok();
    std::fs::create_dir_all(config.cache.log_dir()).ok();

    info!("starting API server");

    let store = Arc::new(
        SqliteStore::new(&config.store.url)
            .await
            .expect("failed to initialize task store"),
    );
    let task_store: Arc<dyn TaskStore> = store.clone();
    let device_store: Arc<dyn DeviceStore> = store;

    let state = AppState {
        task_store,
        device_store,
        config: Arc::new(config.clone()),
    };

    let app = create_api_routes().layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );
    let app = app.with_state(state);

    let bind_addr = config.bind_address();
    info!(%bind_addr, "binding API server");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    axum::serve(listener, app)
        .await
        .expect("API server crashed");
}
