use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use common::storage::types::processing_task::{ProcessingTask, TaskKind, TaskProgress, TaskStatus};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Serialize)]
pub struct TaskView {
    task_id: String,
    repo_id: String,
    kind: TaskKind,
    status: TaskStatus,
    progress: TaskProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = ProcessingTask::get_required(&task_id, &state.db).await?;

    Ok(Json(TaskView {
        task_id: task.id,
        repo_id: task.repo_id,
        kind: task.kind,
        status: task.status,
        progress: task.progress,
        error: task.error,
        result: task.result,
        created_at: task.created_at,
        updated_at: task.updated_at,
    }))
}
