use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Model preferences chosen by the client, consumed by the pipeline and the
/// query engine when building per-request provider contexts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionPreferences {
    pub ai_provider: String,
    pub ai_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

stored_object!(Session, "session", {
    preferences: Option<SessionPreferences>,
    repositories: Vec<String>
});

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            preferences: None,
            repositories: Vec::new(),
        }
    }

    pub async fn get_required(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
    }

    pub async fn update_preferences(
        id: &str,
        preferences: SessionPreferences,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/preferences", preferences))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        updated.ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
    }

    /// Record that a repository was ingested under this session.
    pub async fn add_repository(
        id: &str,
        repo_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($table, $id)
             SET repositories += $repo_id, updated_at = time::now()",
        )
        .bind(("table", Self::table_name()))
        .bind(("id", id.to_string()))
        .bind(("repo_id", repo_id.to_string()))
        .await?;

        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
