mod config;
mod middleware;
mod routes;
mod services;
mod state;
mod utils;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{config::Config, state::AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    let store = config
        .s3
        .build_store()
        .expect("Failed to configure the object store");
    let bind_addr = config.bind_addr;
    let state = AppState::new(config, store).expect("Failed to build the Tinify client");
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .expect("Failed to bind listener");
    info!(%bind_addr, "graphic tools service listening");
    axum::serve(listener, app)
        .await
        .expect("Failed to init Axum service");
}
