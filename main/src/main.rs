use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use common::utils::config::get_config;
use ingestion_pipeline::{run_worker_loop, IngestionPipeline};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Combined deployment: HTTP server and ingestion worker in one process,
/// sharing the store connection.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let api_state = ApiState::new(&config).await?;
    let db = Arc::clone(&api_state.db);

    let app = Router::new()
        .merge(api_routes(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&db), config));
    let worker = tokio::spawn(async move {
        info!("Starting worker process");
        if let Err(e) = run_worker_loop(db, ingestion_pipeline).await {
            error!("Worker process error: {}", e);
        }
    });

    let _ = tokio::join!(server, worker);

    Ok(())
}
