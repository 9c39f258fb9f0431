use actix_web::{App, HttpServer, web};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod db;
mod extractor;
mod model;
mod service;

use app::AppState;
use model::Config;

/// Largest accepted PDF upload
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr();
    tracing::debug!(config = ?config, "Resolved configuration");

    let state = AppState::new(config)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    if let Some(queue) = state.queue.clone() {
        tokio::spawn(service::queue::run_worker(
            queue,
            std::sync::Arc::clone(&state.ingestion),
        ));
    }

    let auth = web::Data::new(state.config.auth.clone());
    let state = web::Data::new(state);

    tracing::info!("Starting threat risk intelligence server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(auth.clone())
            .app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
