use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use common::{
    error::AppError,
    storage::types::{
        processing_task::ProcessingTask,
        repo_file::RepoFile,
        repository::{Repository, RepositoryStatus, TreeNode},
        session::Session,
    },
    utils::source_url::parse_repo_url,
};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    session_id: String,
    github_url: String,
}

#[derive(Serialize)]
pub struct RepositoryView {
    repo_id: String,
    session_id: String,
    source_url: String,
    owner: String,
    name: String,
    default_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    status: RepositoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    file_count: u64,
    languages: std::collections::BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Repository> for RepositoryView {
    fn from(repo: Repository) -> Self {
        Self {
            repo_id: repo.id,
            session_id: repo.session_id,
            source_url: repo.source_url,
            owner: repo.owner,
            name: repo.name,
            default_branch: repo.default_branch,
            description: repo.description,
            status: repo.status,
            task_id: repo.task_id,
            file_count: repo.file_count,
            languages: repo.languages,
            overview: repo.overview,
            error_message: repo.error_message,
            created_at: repo.created_at,
        }
    }
}

/// Start an ingestion: creates the Repository and its durable task; a worker
/// claims the task asynchronously.
pub async fn ingest_repository(
    State(state): State<ApiState>,
    Json(body): Json<IngestBody>,
) -> Result<impl IntoResponse, ApiError> {
    Session::get_required(&body.session_id, &state.db).await?;

    let locator = parse_repo_url(&body.github_url)?;

    let mut repo = Repository::new(
        body.session_id.clone(),
        body.github_url.clone(),
        locator.owner,
        locator.name,
    );
    let task = ProcessingTask::new(repo.id.clone());
    repo.task_id = Some(task.id.clone());

    let repo_id = repo.id.clone();
    let task_id = task.id.clone();

    state
        .db
        .store_item(repo.clone())
        .await
        .map_err(AppError::from)?;
    state.db.store_item(task).await.map_err(AppError::from)?;
    Session::add_repository(&body.session_id, &repo_id, &state.db).await?;

    info!(%repo_id, %task_id, url = %body.github_url, "ingestion queued");

    Ok((
        StatusCode::OK,
        Json(json!({
            "repo_id": repo_id,
            "task_id": task_id,
            "status": repo.status,
            "metadata": {
                "owner": repo.owner,
                "name": repo.name,
                "source_url": repo.source_url,
            }
        })),
    ))
}

pub async fn get_repository(
    State(state): State<ApiState>,
    Path(repo_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = Repository::get_required(&repo_id, &state.db).await?;

    Ok(Json(RepositoryView::from(repo)))
}

#[derive(Serialize)]
pub struct TreeView {
    file_tree: TreeNode,
}

pub async fn get_tree(
    State(state): State<ApiState>,
    Path(repo_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = Repository::get_required(&repo_id, &state.db).await?;

    Ok(Json(TreeView {
        file_tree: repo.file_tree,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    path: String,
}

pub async fn get_file(
    State(state): State<ApiState>,
    Path(repo_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let file = RepoFile::get_by_path(&repo_id, &query.path, &state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File {} not found", query.path)))?;

    Ok(Json(json!({
        "file_id": file.id,
        "repo_id": file.repo_id,
        "path": file.path,
        "filename": file.filename,
        "language": file.language,
        "content": file.content,
        "size": file.size,
        "parsed": file.parsed,
        "embedded": file.embedded,
        "functions": file.functions,
        "classes": file.classes,
        "imports": file.imports,
        "dependencies": file.dependencies,
        "summary": file.summary,
    })))
}
