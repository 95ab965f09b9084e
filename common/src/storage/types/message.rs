#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Tool invocation executed during an assistant turn. `arguments` is the
/// string-encoded JSON object exactly as the provider sent it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessageMeta {
    #[serde(default)]
    pub truncated: bool,
}

stored_object!(Message, "message", {
    conversation_id: String,
    role: MessageRole,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallRecord>>,
    sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_meta: Option<MessageMeta>
});

impl Message {
    pub fn new(
        conversation_id: String,
        role: MessageRole,
        content: String,
        tool_calls: Option<Vec<ToolCallRecord>>,
        sequence_number: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            role,
            content,
            tool_calls,
            sequence_number,
            provider_meta: None,
        }
    }

    /// Next sequence number for a conversation, contiguous from 1. The caller
    /// holds the per-conversation lock, so the read-then-write is safe.
    pub async fn next_sequence_number(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<u64, AppError> {
        #[derive(Deserialize)]
        struct MaxRow {
            highest: Option<u64>,
        }

        let rows: Vec<MaxRow> = db
            .query(
                "SELECT math::max(sequence_number) AS highest FROM type::table($table) \
                 WHERE conversation_id = $conversation_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows
            .first()
            .and_then(|r| r.highest)
            .unwrap_or(0)
            .saturating_add(1))
    }

    /// The last `n` messages of a conversation in ascending sequence order.
    pub async fn last_n(
        conversation_id: &str,
        n: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut messages: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE conversation_id = $conversation_id \
                 ORDER BY sequence_number DESC LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .bind(("limit", n as i64))
            .await?
            .take(0)?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn count_for_conversation(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<u64, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }

        let rows: Vec<CountRow> = db
            .query(
                "SELECT count() AS count FROM type::table($table) \
                 WHERE conversation_id = $conversation_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |r| r.count))
    }
}
