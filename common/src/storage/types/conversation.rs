use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::Message;

stored_object!(Conversation, "conversation", {
    session_id: String,
    repo_id: String,
    title: String,
    system_prompt: String,
    message_count: u64
});

impl Conversation {
    pub fn new(session_id: String, repo_id: String, title: String, system_prompt: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            repo_id,
            title,
            system_prompt,
            message_count: 0,
        }
    }

    /// A conversation is unique per `(session, repo)` pair; the first query
    /// creates it lazily with the given title and system prompt.
    pub async fn find_or_create(
        session_id: &str,
        repo_id: &str,
        title: &str,
        system_prompt: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(existing) = Self::find_for(session_id, repo_id, db).await? {
            return Ok(existing);
        }

        let conversation = Self::new(
            session_id.to_string(),
            repo_id.to_string(),
            title.to_string(),
            system_prompt.to_string(),
        );
        db.store_item(conversation.clone()).await?;

        Ok(conversation)
    }

    pub async fn find_for(
        session_id: &str,
        repo_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE session_id = $session_id AND repo_id = $repo_id \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("session_id", session_id.to_string()))
            .bind(("repo_id", repo_id.to_string()))
            .await?;

        let conversations: Vec<Self> = response.take(0)?;
        Ok(conversations.into_iter().next())
    }

    pub async fn set_message_count(
        id: &str,
        message_count: u64,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _conversation: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/message_count", message_count))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    /// Conversation plus its messages in ascending sequence order.
    pub async fn get_with_messages(
        session_id: &str,
        repo_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<Message>), AppError> {
        let conversation = Self::find_for(session_id, repo_id, db)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        let messages = Message::last_n(&conversation.id, limit, db).await?;

        Ok((conversation, messages))
    }
}
