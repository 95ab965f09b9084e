#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Class => write!(f, "class"),
        }
    }
}

stored_object!(FileChunk, "file_chunk", {
    repo_id: String,
    file_id: String,
    path: String,
    chunk_type: ChunkType,
    chunk_name: String,
    chunk_text: String,
    code: String,
    line_start: u32,
    line_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_class: Option<String>,
    chunk_index: u32,
    total_chunks: u32,
    vector: Vec<f32>
});

/// Search result including the similarity score reported by the index.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: FileChunk,
    pub score: f32,
}

impl FileChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_id: String,
        file_id: String,
        path: String,
        chunk_type: ChunkType,
        chunk_name: String,
        chunk_text: String,
        code: String,
        line_start: u32,
        line_end: u32,
        parent_class: Option<String>,
        chunk_index: u32,
        total_chunks: u32,
        vector: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            repo_id,
            file_id,
            path,
            chunk_type,
            chunk_name,
            chunk_text,
            code,
            line_start,
            line_end,
            parent_class,
            chunk_index,
            total_chunks,
            vector,
        }
    }

    pub async fn list_for_file(file_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE file_id = $file_id ORDER BY chunk_index",
            )
            .bind(("table", Self::table_name()))
            .bind(("file_id", file_id.to_string()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn delete_by_file(file_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query("DELETE type::table($table) WHERE file_id = $file_id")
            .bind(("table", Self::table_name()))
            .bind(("file_id", file_id.to_string()))
            .await?;

        Ok(())
    }

    /// Nearest neighbors over chunk vectors within the repository.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        repo_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[derive(Deserialize)]
        struct ScoreRow {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            id: String,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT
                id,
                vector::similarity::cosine(vector, $embedding) AS score
            FROM {table}
            WHERE repo_id = $repo_id
              AND vector <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#,
            table = Self::table_name(),
            take = take
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("repo_id", repo_id.to_string()))
            .await
            .map_err(|e| AppError::InternalError(format!("Surreal query failed: {e}")))?;

        let score_rows: Vec<ScoreRow> = response.take::<Vec<ScoreRow>>(0).unwrap_or_default();

        let mut results = Vec::with_capacity(score_rows.len());
        for row in score_rows {
            if let Some(chunk) = db.get_item::<Self>(&row.id).await? {
                results.push(ChunkSearchResult {
                    chunk,
                    score: row.score,
                });
            }
        }

        Ok(results)
    }
}
