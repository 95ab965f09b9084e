use serde::Deserialize;
use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{file_chunk::FileChunk, repo_file::RepoFile, StoredObject},
    },
};

/// Lexical hit against the file table (path + summary fields).
#[derive(Debug)]
pub struct FileTextHit {
    pub file: RepoFile,
    pub score: f32,
}

/// Lexical hit against the chunk table (chunk_text + code fields).
#[derive(Debug)]
pub struct ChunkTextHit {
    pub chunk: FileChunk,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct ScoreRow {
    id: String,
    text_score: Option<f32>,
}

/// BM25 search over `repo_file.path` and `repo_file.summary`, scoped to one
/// repository. Two indexed fields contribute; absent scores count as zero.
pub async fn file_text_hits(
    take: usize,
    query: &str,
    repo_id: &str,
    db: &SurrealDbClient,
) -> Result<Vec<FileTextHit>, AppError> {
    let sql = format!(
        "SELECT record::id(id) AS id, \
             (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) + \
             (IF search::score(1) != NONE THEN search::score(1) ELSE 0 END) AS text_score \
         FROM {table} \
         WHERE (path @0@ $terms OR summary @1@ $terms) \
           AND repo_id = $repo_id \
         ORDER BY text_score DESC \
         LIMIT $limit",
        table = RepoFile::table_name(),
    );

    let mut response = db
        .query(sql)
        .bind(("terms", query.to_owned()))
        .bind(("repo_id", repo_id.to_owned()))
        .bind(("limit", take as i64))
        .await?;

    let score_rows: Vec<ScoreRow> = response.take(0)?;
    debug!(repo_id, hits = score_rows.len(), "file lexical pass");

    let mut hits = Vec::with_capacity(score_rows.len());
    for row in score_rows {
        if let Some(file) = db.get_item::<RepoFile>(&row.id).await? {
            hits.push(FileTextHit {
                file,
                score: row.text_score.unwrap_or_default(),
            });
        }
    }

    Ok(hits)
}

/// BM25 search over `file_chunk.chunk_text` and `file_chunk.code`, scoped to
/// one repository.
pub async fn chunk_text_hits(
    take: usize,
    query: &str,
    repo_id: &str,
    db: &SurrealDbClient,
) -> Result<Vec<ChunkTextHit>, AppError> {
    let sql = format!(
        "SELECT record::id(id) AS id, \
             (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) + \
             (IF search::score(1) != NONE THEN search::score(1) ELSE 0 END) AS text_score \
         FROM {table} \
         WHERE (chunk_text @0@ $terms OR code @1@ $terms) \
           AND repo_id = $repo_id \
         ORDER BY text_score DESC \
         LIMIT $limit",
        table = FileChunk::table_name(),
    );

    let mut response = db
        .query(sql)
        .bind(("terms", query.to_owned()))
        .bind(("repo_id", repo_id.to_owned()))
        .bind(("limit", take as i64))
        .await?;

    let score_rows: Vec<ScoreRow> = response.take(0)?;
    debug!(repo_id, hits = score_rows.len(), "chunk lexical pass");

    let mut hits = Vec::with_capacity(score_rows.len());
    for row in score_rows {
        if let Some(chunk) = db.get_item::<FileChunk>(&row.id).await? {
            hits.push(ChunkTextHit {
                chunk,
                score: row.text_score.unwrap_or_default(),
            });
        }
    }

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::file_chunk::ChunkType;
    use uuid::Uuid;

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("lexical_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized(3).await.expect("indexes");
        db
    }

    fn file_with_summary(repo_id: &str, path: &str, summary: &str) -> RepoFile {
        let mut file = RepoFile::new(
            repo_id.to_string(),
            path.to_string(),
            "python".to_string(),
            "print('x')\n".to_string(),
        );
        file.summary = Some(summary.to_string());
        file
    }

    #[tokio::test]
    async fn file_hits_match_summary_terms_and_scope_by_repo() {
        let db = setup().await;

        db.store_item(file_with_summary(
            "r1",
            "tokenizer.py",
            "Splits source text into tokens for the parser",
        ))
        .await
        .expect("store file");
        db.store_item(file_with_summary(
            "r2",
            "other.py",
            "Tokenizer used by a different repository",
        ))
        .await
        .expect("store other-repo file");

        let hits = file_text_hits(10, "tokenizer", "r1", &db)
            .await
            .expect("lexical search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file.path, "tokenizer.py");
        assert!(hits[0].score.is_finite());
    }

    #[tokio::test]
    async fn chunk_hits_match_code_and_description() {
        let db = setup().await;

        let chunk = FileChunk::new(
            "r1".to_string(),
            "f1".to_string(),
            "src/engine.py".to_string(),
            ChunkType::Function,
            "ignite".to_string(),
            "Function ignite in src/engine.py".to_string(),
            "def ignite(spark):\n    return spark * 2".to_string(),
            1,
            2,
            None,
            0,
            1,
            vec![0.0; 3],
        );
        db.store_item(chunk).await.expect("store chunk");

        let by_description = chunk_text_hits(10, "ignite", "r1", &db)
            .await
            .expect("search by description");
        assert_eq!(by_description.len(), 1);

        let by_code = chunk_text_hits(10, "spark", "r1", &db)
            .await
            .expect("search by code");
        assert_eq!(by_code.len(), 1);

        let miss = chunk_text_hits(10, "missing", "r1", &db)
            .await
            .expect("search miss");
        assert!(miss.is_empty());
    }
}
