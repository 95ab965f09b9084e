use tracing::{debug, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const FTS_ANALYZER_NAME: &str = "app_code_fts_analyzer";

#[derive(Clone, Copy)]
struct HnswIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
    options: &'static str,
}

const fn hnsw_index_specs() -> [HnswIndexSpec; 2] {
    [
        HnswIndexSpec {
            index_name: "idx_embedding_file_chunk",
            table: "file_chunk",
            field: "vector",
            options: "DIST COSINE TYPE F32 EFC 100 M 8",
        },
        HnswIndexSpec {
            index_name: "idx_embedding_file_summary",
            table: "repo_file",
            field: "summary_vector",
            options: "DIST COSINE TYPE F32 EFC 100 M 8",
        },
    ]
}

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
}

const fn fts_index_specs() -> [FtsIndexSpec; 4] {
    [
        FtsIndexSpec {
            index_name: "repo_file_fts_path_idx",
            table: "repo_file",
            field: "path",
        },
        FtsIndexSpec {
            index_name: "repo_file_fts_summary_idx",
            table: "repo_file",
            field: "summary",
        },
        FtsIndexSpec {
            index_name: "file_chunk_fts_text_idx",
            table: "file_chunk",
            field: "chunk_text",
        },
        FtsIndexSpec {
            index_name: "file_chunk_fts_code_idx",
            table: "file_chunk",
            field: "code",
        },
    ]
}

/// Plain field indexes backing the per-repository scoping filters.
const SCOPING_INDEXES: &str = "
    DEFINE INDEX IF NOT EXISTS idx_repo_file_repo ON repo_file FIELDS repo_id;
    DEFINE INDEX IF NOT EXISTS idx_repo_file_path ON repo_file FIELDS repo_id, path;
    DEFINE INDEX IF NOT EXISTS idx_file_chunk_repo ON file_chunk FIELDS repo_id;
    DEFINE INDEX IF NOT EXISTS idx_task_repo ON processing_task FIELDS repo_id;
    DEFINE INDEX IF NOT EXISTS idx_message_conversation ON message FIELDS conversation_id;
    DEFINE INDEX IF NOT EXISTS idx_conversation_scope ON conversation FIELDS session_id, repo_id;
";

impl HnswIndexSpec {
    fn definition(&self, dimension: usize, overwrite: bool) -> String {
        let clause = if overwrite {
            "OVERWRITE"
        } else {
            "IF NOT EXISTS"
        };
        format!(
            "DEFINE INDEX {clause} {index} ON TABLE {table} \
             FIELDS {field} HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            field = self.field,
            options = self.options,
        )
    }
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {field} \
             SEARCH ANALYZER {analyzer} BM25;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = FTS_ANALYZER_NAME,
        )
    }
}

/// Build runtime Surreal indexes (FTS + HNSW).
///
/// Idempotent: safe to call multiple times. The HNSW definitions are
/// overwritten when the embedding dimension no longer matches the stored
/// definition, which happens when a session switches embedding providers.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    create_fts_analyzer(db).await?;

    db.client.query(SCOPING_INDEXES).await?.check()?;

    for spec in fts_index_specs() {
        db.client.query(spec.definition()).await?.check()?;
    }

    for spec in hnsw_index_specs() {
        match existing_hnsw_dimension(db, &spec).await? {
            None => {
                db.client
                    .query(spec.definition(embedding_dimension, false))
                    .await?
                    .check()?;
            }
            Some(existing) if existing == embedding_dimension => {}
            Some(existing) => {
                debug!(
                    index = spec.index_name,
                    existing_dimension = existing,
                    target_dimension = embedding_dimension,
                    "Overwriting HNSW index to match new embedding dimension"
                );
                db.client
                    .query(spec.definition(embedding_dimension, true))
                    .await?
                    .check()?;
            }
        }
    }

    Ok(())
}

async fn existing_hnsw_dimension(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
) -> Result<Option<usize>, AppError> {
    let info_query = format!("INFO FOR TABLE {};", spec.table);
    let mut response = db.client.query(info_query).await?;

    let info: surrealdb::Value = response.take(0)?;
    let info_json: serde_json::Value = serde_json::to_value(info)
        .map_err(|e| AppError::InternalError(format!("serializing table info: {e}")))?;

    let definition = info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.get(spec.index_name))
        .and_then(|d| d.get("Strand"))
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    Ok(definition.as_deref().and_then(extract_dimension))
}

fn extract_dimension(definition: &str) -> Option<usize> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<usize>().ok())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<(), AppError> {
    // Prefer snowball stemming when supported; fall back to ascii-only when
    // the filter is unavailable in the running Surreal build.
    let snowball_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class, punct
            FILTERS lowercase, ascii, snowball(english);"
    );

    match db.client.query(snowball_query).await {
        Ok(res) => {
            if res.check().is_ok() {
                return Ok(());
            }
        }
        Err(err) => {
            warn!(
                error = %err,
                "Snowball analyzer creation errored; attempting ascii fallback definition"
            );
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class, punct
            FILTERS lowercase, ascii;"
    );

    db.client.query(fallback_query).await?.check()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_embedding_file_chunk ON TABLE file_chunk FIELDS vector HNSW DIMENSION 1536 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(1536));
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let namespace = "indexes_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory db");

        ensure_runtime_indexes(&db, 1536)
            .await
            .expect("initial index creation");

        ensure_runtime_indexes(&db, 1536)
            .await
            .expect("second index creation");
    }

    #[tokio::test]
    async fn ensure_hnsw_index_overwrites_dimension() {
        let namespace = "indexes_dim";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory db");

        ensure_runtime_indexes(&db, 1536)
            .await
            .expect("initial index creation");

        // Change dimension and ensure the overwrite path is exercised
        ensure_runtime_indexes(&db, 128)
            .await
            .expect("overwritten index creation");
    }
}
