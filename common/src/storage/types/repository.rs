use std::collections::BTreeMap;

use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Fetched,
    Processing,
    Completed,
    Failed,
}

impl RepositoryStatus {
    /// Legal transitions: fetched → processing → completed, and either of the
    /// first two may go to failed. Everything else is rejected.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Fetched, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Fetched | Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetched => write!(f, "fetched"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TreeNodeType {
    File,
    Folder,
}

/// Recursive file tree node. Folders carry children keyed by path segment;
/// files carry the repo-relative path, blob size and detected language.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    #[serde(rename = "type")]
    pub node_type: TreeNodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, TreeNode>>,
}

impl TreeNode {
    pub fn folder() -> Self {
        Self {
            node_type: TreeNodeType::Folder,
            path: None,
            size: None,
            language: None,
            children: Some(BTreeMap::new()),
        }
    }

    pub fn file(path: String, size: u64, language: Option<String>) -> Self {
        Self {
            node_type: TreeNodeType::File,
            path: Some(path),
            size: Some(size),
            language,
            children: None,
        }
    }

    /// Insert a file at a repo-relative path, creating folders on the way.
    pub fn insert(&mut self, path: &str, size: u64, language: Option<String>) {
        let mut node = self;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((leaf, folders)) = segments.split_last() else {
            return;
        };

        for segment in folders {
            node = node
                .children
                .get_or_insert_with(BTreeMap::new)
                .entry((*segment).to_string())
                .or_insert_with(TreeNode::folder);
        }

        node.children.get_or_insert_with(BTreeMap::new).insert(
            (*leaf).to_string(),
            TreeNode::file(path.to_string(), size, language),
        );
    }
}

stored_object!(Repository, "repository", {
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
    languages: BTreeMap<String, u64>,
    file_tree: TreeNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overview_embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding_dimensions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>
});

impl Repository {
    pub fn new(session_id: String, source_url: String, owner: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            source_url,
            owner,
            name,
            default_branch: "main".to_string(),
            description: None,
            status: RepositoryStatus::Fetched,
            task_id: None,
            file_count: 0,
            languages: BTreeMap::new(),
            file_tree: TreeNode::folder(),
            overview: None,
            overview_embedding: None,
            embedding_dimensions: None,
            error_message: None,
        }
    }

    pub async fn get_required(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Repository {id} not found")))
    }

    /// Advance the repository status, enforcing the legal transition graph.
    pub async fn transition_status(
        id: &str,
        next: RepositoryStatus,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let current = Self::get_required(id, db).await?;
        if !current.status.can_transition_to(next) {
            return Err(AppError::InternalError(format!(
                "illegal repository status transition {} -> {}",
                current.status, next
            )));
        }

        let mut update = db
            .update::<Option<Self>>((Self::table_name(), id))
            .patch(PatchOp::replace("/status", next))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ));
        if let Some(message) = error_message {
            update = update.patch(PatchOp::replace("/error_message", message));
        }
        let _repo: Option<Self> = update.await?;

        Ok(())
    }

    /// Persist what the fetch stage learned from the source host.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_fetch_results(
        id: &str,
        default_branch: String,
        description: Option<String>,
        languages: BTreeMap<String, u64>,
        file_tree: TreeNode,
        file_count: u64,
        task_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut update = db
            .update::<Option<Self>>((Self::table_name(), id))
            .patch(PatchOp::replace("/default_branch", default_branch))
            .patch(PatchOp::replace("/languages", languages))
            .patch(PatchOp::replace("/file_tree", file_tree))
            .patch(PatchOp::replace("/file_count", file_count))
            .patch(PatchOp::replace("/task_id", task_id.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ));
        if let Some(description) = description {
            update = update.patch(PatchOp::replace("/description", description));
        }
        let _repo: Option<Self> = update.await?;

        Ok(())
    }

    pub async fn set_overview(
        id: &str,
        overview: String,
        overview_embedding: Option<Vec<f32>>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut update = db
            .update::<Option<Self>>((Self::table_name(), id))
            .patch(PatchOp::replace("/overview", overview));
        if let Some(embedding) = overview_embedding {
            update = update.patch(PatchOp::replace("/overview_embedding", embedding));
        }
        let _repo: Option<Self> = update.await?;

        Ok(())
    }

    /// Cache the provider's embedding dimension discovered on the first call.
    pub async fn set_embedding_dimensions(
        id: &str,
        dimensions: u64,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _repo: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/embedding_dimensions", dimensions))
            .await?;

        Ok(())
    }
}
