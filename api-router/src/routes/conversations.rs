use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use common::storage::types::{
    conversation::Conversation,
    message::{Message, MessageMeta, MessageRole, ToolCallRecord},
};

use crate::{api_state::ApiState, error::ApiError};

const DEFAULT_MESSAGE_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CurrentConversationQuery {
    session_id: String,
    repo_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ConversationView {
    conversation_id: String,
    session_id: String,
    repo_id: String,
    title: String,
    message_count: u64,
}

#[derive(Serialize)]
pub struct MessageView {
    message_id: String,
    role: MessageRole,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallRecord>>,
    sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_meta: Option<MessageMeta>,
}

#[derive(Serialize)]
pub struct CurrentConversationView {
    conversation: ConversationView,
    messages: Vec<MessageView>,
    total_messages: u64,
}

pub async fn get_current_conversation(
    State(state): State<ApiState>,
    Query(query): Query<CurrentConversationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);

    let (conversation, messages) =
        Conversation::get_with_messages(&query.session_id, &query.repo_id, limit, &state.db)
            .await?;

    let total_messages = Message::count_for_conversation(&conversation.id, &state.db).await?;

    Ok(Json(CurrentConversationView {
        conversation: ConversationView {
            conversation_id: conversation.id,
            session_id: conversation.session_id,
            repo_id: conversation.repo_id,
            title: conversation.title,
            message_count: conversation.message_count,
        },
        messages: messages
            .into_iter()
            .map(|message| MessageView {
                message_id: message.id,
                role: message.role,
                content: message.content,
                tool_calls: message.tool_calls,
                sequence_number: message.sequence_number,
                provider_meta: message.provider_meta,
            })
            .collect(),
        total_messages,
    }))
}
