use std::sync::Arc;

use common::{
    storage::db::{SurrealDbClient, DEFAULT_EMBEDDING_DIMENSION},
    utils::config::get_config,
};
use ingestion_pipeline::{run_worker_loop, IngestionPipeline};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.store_uri,
            &config.store_username,
            &config.store_password,
            &config.store_namespace,
            &config.database_name,
        )
        .await?,
    );

    db.ensure_initialized(DEFAULT_EMBEDDING_DIMENSION).await?;

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(db.clone(), config));

    run_worker_loop(db, ingestion_pipeline).await
}
