mod config;
mod message;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::persistence::{self, JsonFileStorage, RoomStorage};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();

    let storage: Arc<dyn RoomStorage> = Arc::new(JsonFileStorage::new(config.state_file.clone()));
    let store = persistence::load_rooms(storage.as_ref()).await;
    tracing::info!(rooms = store.room_count(), state_file = %config.state_file.display(), "room state ready");

    // Spawn background persistence worker and timer engine.
    let (persister, _persistence) = persistence::spawn_persistence_worker(storage);
    let state = state::AppState::new(store, Some(persister.clone()), config);
    let _timer = services::timer::spawn_timer_task(state.clone());

    let addr = state.config.listen_addr();
    let app = routes::app(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, "tagteam listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    // Final snapshot so nothing written since the last save is lost.
    {
        let registry = state.rooms.read().await;
        state.persist(&registry);
    }
    persister.flush().await;
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
