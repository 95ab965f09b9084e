use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{file_chunk::FileChunk, repo_file::RepoFile},
    },
    utils::embedding::Embedder,
};

use crate::{
    lexical,
    scoring::{filename_of, min_max_normalize, Candidate, CandidateSet, HybridWeights},
};

pub const DEFAULT_TOP_K: usize = 5;

/// A surviving chunk hit inside a deduplicated file result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeElement {
    pub chunk_name: String,
    pub chunk_type: String,
    pub line_start: u32,
    pub line_end: u32,
    pub code: String,
}

/// One ranked, file-deduplicated search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub file_id: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub code_elements: Vec<CodeElement>,
    pub score: f32,
}

/// Embed the query, then run the vector and lexical passes.
pub async fn hybrid_search(
    db: &SurrealDbClient,
    embedder: &Embedder,
    repo_id: &str,
    query_text: &str,
    top_k: usize,
) -> Result<Vec<SearchResult>, AppError> {
    let query_embedding = embedder.embed_one(query_text).await?;
    hybrid_search_with_embedding(db, query_embedding, repo_id, query_text, top_k).await
}

/// Hybrid retrieval with a precomputed query embedding.
///
/// Two bounded vector passes (summary index and code index, `2·top_k` each)
/// and one lexical pass (`4·top_k` hits over path, summary, chunk text and
/// code) feed a fused score per candidate; candidates collapse per file and
/// the best `top_k` files come back in deterministic order.
#[instrument(level = "debug", skip(db, query_embedding))]
pub async fn hybrid_search_with_embedding(
    db: &SurrealDbClient,
    query_embedding: Vec<f32>,
    repo_id: &str,
    query_text: &str,
    top_k: usize,
) -> Result<Vec<SearchResult>, AppError> {
    let top_k = top_k.max(1);
    let vector_take = top_k * 2;
    let lexical_take = top_k * 4;

    let (summary_hits, chunk_hits, file_text, chunk_text) = tokio::try_join!(
        RepoFile::vector_search_summaries(vector_take, query_embedding.clone(), repo_id, db),
        FileChunk::vector_search(vector_take, query_embedding.clone(), repo_id, db),
        lexical::file_text_hits(lexical_take, query_text, repo_id, db),
        lexical::chunk_text_hits(lexical_take, query_text, repo_id, db),
    )?;

    debug!(
        repo_id,
        summary_hits = summary_hits.len(),
        chunk_hits = chunk_hits.len(),
        lexical_file_hits = file_text.len(),
        lexical_chunk_hits = chunk_text.len(),
        "hybrid search candidate pools"
    );

    // The lexical pool is bounded as a whole, then normalised into [0,1]
    // across both tables so file and chunk hits are comparable.
    let mut lexical_pool: Vec<(LexicalHit, f32)> = file_text
        .into_iter()
        .map(|hit| (LexicalHit::File(Box::new(hit.file)), hit.score))
        .chain(
            chunk_text
                .into_iter()
                .map(|hit| (LexicalHit::Chunk(Box::new(hit.chunk)), hit.score)),
        )
        .collect();
    lexical_pool.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    lexical_pool.truncate(lexical_take);

    let normalized = min_max_normalize(&lexical_pool.iter().map(|(_, s)| *s).collect::<Vec<_>>());

    let mut set = CandidateSet::default();

    for hit in summary_hits {
        set.merge(summary_candidate(&hit.file, Some(hit.score), None));
    }
    for hit in chunk_hits {
        set.merge(chunk_candidate(&hit.chunk, Some(hit.score), None));
    }
    for ((hit, _), text_score) in lexical_pool.into_iter().zip(normalized) {
        match hit {
            LexicalHit::File(file) => {
                set.merge(summary_candidate(&file, None, Some(text_score)));
            }
            LexicalHit::Chunk(chunk) => {
                set.merge(chunk_candidate(&chunk, None, Some(text_score)));
            }
        }
    }

    if set.is_empty() {
        return Ok(Vec::new());
    }

    let mut results = set.into_ranked(query_text, HybridWeights::default(), top_k);

    // Chunk-only groups carry no language; hydrate it from the file row.
    for result in &mut results {
        if result.language.is_none() {
            if let Some(file) = db.get_item::<RepoFile>(&result.file_id).await? {
                result.language = Some(file.language);
                if result.summary.is_none() {
                    result.summary = file.summary;
                }
            }
        }
    }

    Ok(results)
}

enum LexicalHit {
    File(Box<RepoFile>),
    Chunk(Box<FileChunk>),
}

fn summary_candidate(
    file: &RepoFile,
    vector_score: Option<f32>,
    text_score: Option<f32>,
) -> Candidate {
    Candidate {
        file_id: file.id.clone(),
        chunk_index: None,
        path: file.path.clone(),
        filename: file.filename.clone(),
        language: Some(file.language.clone()),
        summary: file.summary.clone(),
        vector_score,
        text_score,
        element: None,
    }
}

fn chunk_candidate(
    chunk: &FileChunk,
    vector_score: Option<f32>,
    text_score: Option<f32>,
) -> Candidate {
    Candidate {
        file_id: chunk.file_id.clone(),
        chunk_index: Some(chunk.chunk_index),
        path: chunk.path.clone(),
        filename: filename_of(&chunk.path),
        language: None,
        summary: None,
        vector_score,
        text_score,
        element: Some(CodeElement {
            chunk_name: chunk.chunk_name.clone(),
            chunk_type: chunk.chunk_type.to_string(),
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            code: chunk.code.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::file_chunk::ChunkType;
    use uuid::Uuid;

    const DIM: usize = 3;

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("search_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized(DIM).await.expect("indexes");
        db
    }

    async fn store_file(
        db: &SurrealDbClient,
        repo_id: &str,
        path: &str,
        summary: &str,
        vector: Vec<f32>,
    ) -> RepoFile {
        let mut file = RepoFile::new(
            repo_id.to_string(),
            path.to_string(),
            "python".to_string(),
            format!("# {path}\n"),
        );
        file.summary = Some(summary.to_string());
        file.summary_vector = Some(vector);
        db.store_item(file.clone()).await.expect("store file");
        file
    }

    async fn store_chunk(
        db: &SurrealDbClient,
        repo_id: &str,
        file: &RepoFile,
        index: u32,
        name: &str,
        vector: Vec<f32>,
    ) {
        let chunk = FileChunk::new(
            repo_id.to_string(),
            file.id.clone(),
            file.path.clone(),
            ChunkType::Function,
            name.to_string(),
            format!("Function {name} in {}", file.path),
            format!("def {name}(): pass"),
            index * 10 + 1,
            index * 10 + 3,
            None,
            index,
            2,
            vector,
        );
        db.store_item(chunk).await.expect("store chunk");
    }

    #[tokio::test]
    async fn filename_boost_ranks_matching_file_first() {
        let db = setup().await;
        // Both files mention "parser" once in their summaries and sit at the
        // same distance from the query vector.
        store_file(
            &db,
            "r1",
            "parser.py",
            "Contains one parser routine",
            vec![1.0, 0.0, 0.0],
        )
        .await;
        store_file(
            &db,
            "r1",
            "utils.py",
            "Helpers used by the parser once",
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let results =
            hybrid_search_with_embedding(&db, vec![1.0, 0.0, 0.0], "r1", "parser", 5)
                .await
                .expect("search");

        assert!(!results.is_empty());
        assert_eq!(results[0].path, "parser.py");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn results_deduplicate_chunks_under_their_file() {
        let db = setup().await;
        let file = store_file(
            &db,
            "r1",
            "src/engine.py",
            "Engine module",
            vec![0.9, 0.1, 0.0],
        )
        .await;
        store_chunk(&db, "r1", &file, 0, "ignite", vec![1.0, 0.0, 0.0]).await;
        store_chunk(&db, "r1", &file, 1, "shutdown", vec![0.8, 0.2, 0.0]).await;

        let results =
            hybrid_search_with_embedding(&db, vec![1.0, 0.0, 0.0], "r1", "engine ignite", 5)
                .await
                .expect("search");

        assert_eq!(results.len(), 1, "one result per file");
        let result = &results[0];
        assert_eq!(result.path, "src/engine.py");
        assert_eq!(result.code_elements.len(), 2);
        assert!(result.summary.is_some());
        assert_eq!(result.language.as_deref(), Some("python"));
    }

    #[tokio::test]
    async fn empty_repository_returns_no_results() {
        let db = setup().await;

        let results = hybrid_search_with_embedding(&db, vec![1.0, 0.0, 0.0], "r1", "anything", 5)
            .await
            .expect("search");

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_is_deterministic_for_fixed_embeddings() {
        let db = setup().await;
        store_file(&db, "r1", "a.py", "alpha module", vec![1.0, 0.0, 0.0]).await;
        store_file(&db, "r1", "b.py", "beta module", vec![0.0, 1.0, 0.0]).await;
        store_file(&db, "r1", "c.py", "gamma module", vec![0.0, 0.0, 1.0]).await;

        let first = hybrid_search_with_embedding(&db, vec![0.7, 0.7, 0.0], "r1", "module", 3)
            .await
            .expect("first search");
        let second = hybrid_search_with_embedding(&db, vec![0.7, 0.7, 0.0], "r1", "module", 3)
            .await
            .expect("second search");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn scopes_to_requested_repository() {
        let db = setup().await;
        store_file(&db, "r1", "a.py", "alpha module", vec![1.0, 0.0, 0.0]).await;
        store_file(&db, "r2", "b.py", "alpha module elsewhere", vec![1.0, 0.0, 0.0]).await;

        let results = hybrid_search_with_embedding(&db, vec![1.0, 0.0, 0.0], "r1", "alpha", 5)
            .await
            .expect("search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "a.py");
    }
}
