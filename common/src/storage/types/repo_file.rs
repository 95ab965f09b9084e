#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// A function or method extracted by the parser. Line spans are 1-based and
/// inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FunctionInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
    pub is_method: bool,
    pub signature: String,
    pub line_start: u32,
    pub line_end: u32,
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClassInfo {
    pub name: String,
    pub line_start: u32,
    pub line_end: u32,
    pub methods: Vec<String>,
}

/// Import edges resolved against the repository's file set. `imports` only
/// ever holds repo-local paths; everything unresolved lands in
/// `external_imports`. `imported_by` is maintained as the exact inverse of
/// `imports` across the file set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Dependencies {
    pub imports: Vec<String>,
    pub imported_by: Vec<String>,
    pub external_imports: Vec<String>,
}

stored_object!(RepoFile, "repo_file", {
    repo_id: String,
    path: String,
    filename: String,
    language: String,
    content: String,
    size: u64,
    parsed: bool,
    embedded: bool,
    functions: Vec<FunctionInfo>,
    classes: Vec<ClassInfo>,
    imports: Vec<String>,
    dependencies: Dependencies,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>
});

/// Search result including the similarity score reported by the index.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct FileSearchResult {
    pub file: RepoFile,
    pub score: f32,
}

impl RepoFile {
    pub fn new(repo_id: String, path: String, language: String, content: String) -> Self {
        let now = Utc::now();
        let filename = path
            .rsplit('/')
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        let size = content.len() as u64;

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            repo_id,
            path,
            filename,
            language,
            content,
            size,
            parsed: false,
            embedded: false,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            dependencies: Dependencies::default(),
            summary: None,
            summary_vector: None,
            error: None,
        }
    }

    pub async fn get_by_path(
        repo_id: &str,
        path: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE repo_id = $repo_id AND path = $path")
            .bind(("table", Self::table_name()))
            .bind(("repo_id", repo_id.to_string()))
            .bind(("path", path.to_string()))
            .await?;

        let files: Vec<Self> = response.take(0)?;
        Ok(files.into_iter().next())
    }

    pub async fn list_for_repo(repo_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let files: Vec<Self> = db
            .query("SELECT * FROM type::table($table) WHERE repo_id = $repo_id ORDER BY path")
            .bind(("table", Self::table_name()))
            .bind(("repo_id", repo_id.to_string()))
            .await?
            .take(0)?;

        Ok(files)
    }

    pub async fn count_for_repo(repo_id: &str, db: &SurrealDbClient) -> Result<u64, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }

        let rows: Vec<CountRow> = db
            .query(
                "SELECT count() AS count FROM type::table($table) \
                 WHERE repo_id = $repo_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("repo_id", repo_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |r| r.count))
    }

    /// Exact function-name match across the repository's files.
    pub async fn find_function(
        repo_id: &str,
        name: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let files: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE repo_id = $repo_id AND functions.name CONTAINS $name \
                 ORDER BY path",
            )
            .bind(("table", Self::table_name()))
            .bind(("repo_id", repo_id.to_string()))
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        Ok(files)
    }

    /// Files ranked by how many other files import them, for the overview.
    pub async fn most_imported(
        repo_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let files: Vec<Self> = db
            .query(
                "SELECT *, array::len(dependencies.imported_by) AS import_count \
                 FROM type::table($table) \
                 WHERE repo_id = $repo_id \
                 ORDER BY import_count DESC, path ASC \
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("repo_id", repo_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        Ok(files)
    }

    pub async fn set_parse_result(
        id: &str,
        parsed: bool,
        functions: Vec<FunctionInfo>,
        classes: Vec<ClassInfo>,
        imports: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _file: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/parsed", parsed))
            .patch(PatchOp::replace("/functions", functions))
            .patch(PatchOp::replace("/classes", classes))
            .patch(PatchOp::replace("/imports", imports))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    pub async fn set_dependencies(
        id: &str,
        dependencies: Dependencies,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _file: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/dependencies", dependencies))
            .await?;

        Ok(())
    }

    pub async fn set_summary(
        id: &str,
        summary: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _file: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/summary", summary))
            .await?;

        Ok(())
    }

    pub async fn set_summary_vector(
        id: &str,
        vector: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _file: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/summary_vector", vector))
            .await?;

        Ok(())
    }

    pub async fn mark_embedded(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _file: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/embedded", true))
            .await?;

        Ok(())
    }

    /// Record a per-file failure without aborting the pipeline; the file keeps
    /// participating in later stages with whatever fields it has.
    pub async fn set_error(id: &str, error: String, db: &SurrealDbClient) -> Result<(), AppError> {
        let _file: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/error", error))
            .await?;

        Ok(())
    }

    /// Nearest neighbors over `summary_vector` within the repository.
    ///
    /// Scores ids first, then hydrates full rows, so the similarity score
    /// survives deserialization of the flexible record id.
    pub async fn vector_search_summaries(
        take: usize,
        query_embedding: Vec<f32>,
        repo_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<FileSearchResult>, AppError> {
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
                vector::similarity::cosine(summary_vector, $embedding) AS score
            FROM {table}
            WHERE repo_id = $repo_id
              AND summary_vector <|{take},100|> $embedding
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
            if let Some(file) = db.get_item::<Self>(&row.id).await? {
                results.push(FileSearchResult {
                    file,
                    score: row.score,
                });
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_file(repo_id: &str, path: &str) -> RepoFile {
        RepoFile::new(
            repo_id.to_string(),
            path.to_string(),
            "python".to_string(),
            "print('hi')\n".to_string(),
        )
    }

    #[test]
    fn filename_is_final_path_segment() {
        let file = make_file("r1", "pkg/utils/helpers.py");
        assert_eq!(file.filename, "helpers.py");

        let top_level = make_file("r1", "setup.py");
        assert_eq!(top_level.filename, "setup.py");
    }

    #[tokio::test]
    async fn test_get_by_path_and_count() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let file_a = make_file("repo-1", "a.py");
        let file_b = make_file("repo-1", "b.py");
        let other = make_file("repo-2", "a.py");

        db.store_item(file_a.clone()).await.expect("store a");
        db.store_item(file_b).await.expect("store b");
        db.store_item(other).await.expect("store other");

        let found = RepoFile::get_by_path("repo-1", "a.py", &db)
            .await
            .expect("get by path")
            .expect("file present");
        assert_eq!(found.id, file_a.id);

        let missing = RepoFile::get_by_path("repo-1", "c.py", &db)
            .await
            .expect("get by path");
        assert!(missing.is_none());

        let count = RepoFile::count_for_repo("repo-1", &db)
            .await
            .expect("count");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_find_function_exact_match() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut file = make_file("repo-1", "a.py");
        file.functions = vec![
            FunctionInfo {
                name: "parse".to_string(),
                signature: "def parse(text)".to_string(),
                line_start: 1,
                line_end: 4,
                parameters: vec!["text".to_string()],
                ..Default::default()
            },
            FunctionInfo {
                name: "render".to_string(),
                signature: "def render()".to_string(),
                line_start: 6,
                line_end: 9,
                ..Default::default()
            },
        ];
        db.store_item(file.clone()).await.expect("store file");

        let matches = RepoFile::find_function("repo-1", "parse", &db)
            .await
            .expect("find function");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, file.id);

        let none = RepoFile::find_function("repo-1", "pars", &db)
            .await
            .expect("find function");
        assert!(none.is_empty(), "prefix must not match");
    }

    #[tokio::test]
    async fn test_most_imported_ordering() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut core = make_file("repo-1", "core.py");
        core.dependencies.imported_by = vec!["a.py".to_string(), "b.py".to_string()];
        let mut helper = make_file("repo-1", "helper.py");
        helper.dependencies.imported_by = vec!["a.py".to_string()];
        let leaf = make_file("repo-1", "leaf.py");

        db.store_item(core.clone()).await.expect("store core");
        db.store_item(helper).await.expect("store helper");
        db.store_item(leaf).await.expect("store leaf");

        let ranked = RepoFile::most_imported("repo-1", 2, &db)
            .await
            .expect("most imported");
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, core.id);
    }

    #[tokio::test]
    async fn test_parse_result_and_error_updates() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let file = make_file("repo-1", "a.py");
        let id = file.id.clone();
        db.store_item(file).await.expect("store file");

        let functions = vec![FunctionInfo {
            name: "run".to_string(),
            signature: "def run()".to_string(),
            line_start: 1,
            line_end: 2,
            ..Default::default()
        }];
        RepoFile::set_parse_result(&id, true, functions.clone(), Vec::new(), Vec::new(), &db)
            .await
            .expect("set parse result");
        RepoFile::set_error(&id, "summary timed out".to_string(), &db)
            .await
            .expect("set error");

        let fetched: RepoFile = db.get_item(&id).await.expect("fetch").expect("present");
        assert!(fetched.parsed);
        assert_eq!(fetched.functions, functions);
        assert_eq!(fetched.error.as_deref(), Some("summary timed out"));
    }
}
