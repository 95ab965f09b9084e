use std::sync::Arc;

use common::{
    storage::db::{SurrealDbClient, DEFAULT_EMBEDDING_DIMENSION},
    utils::config::AppConfig,
};
use query_engine::QueryEngine;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub query_engine: Arc<QueryEngine>,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
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

        Ok(Self::with_resources(db, config.clone()))
    }

    /// Assemble from already-connected resources; tests use this with an
    /// in-memory store.
    pub fn with_resources(db: Arc<SurrealDbClient>, config: AppConfig) -> Self {
        let query_engine = Arc::new(QueryEngine::new(Arc::clone(&db), config.clone()));

        Self {
            db,
            config,
            query_engine,
        }
    }
}
