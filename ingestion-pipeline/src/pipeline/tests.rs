use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            file_chunk::FileChunk,
            processing_task::{ProcessingTask, TaskStatus, TaskStep},
            repo_file::RepoFile,
            repository::{Repository, RepositoryStatus},
            session::Session,
        },
    },
    utils::config::{AppConfig, RuntimeEnv},
};

use crate::{
    fetcher::{BlobEntry, RepoLocator, RepoMetadata},
    pipeline::{IngestionPipeline, PipelineServices, PipelineTuning},
    prompts::EMPTY_REPO_OVERVIEW,
};

const TEST_DIMENSION: usize = 8;

/// Deterministic stand-in embedding so assertions are stable.
fn hashed_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; TEST_DIMENSION];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % TEST_DIMENSION] += f32::from(byte) / 255.0;
    }
    vector
}

struct StubServices {
    blobs: HashMap<String, String>,
    entries: Vec<BlobEntry>,
    failing_summaries: HashSet<String>,
    fail_tree_with_rate_limit: bool,
}

impl StubServices {
    fn for_files(files: &[(&str, &str)]) -> Self {
        let blobs = files
            .iter()
            .map(|(path, content)| (format!("sha-{path}"), (*content).to_string()))
            .collect();
        let entries = files
            .iter()
            .map(|(path, content)| BlobEntry {
                path: (*path).to_string(),
                sha: format!("sha-{path}"),
                size: content.len() as u64,
                language: crate::parser::display_language_for_path(path).map(str::to_string),
            })
            .collect();

        Self {
            blobs,
            entries,
            failing_summaries: HashSet::new(),
            fail_tree_with_rate_limit: false,
        }
    }
}

#[async_trait]
impl PipelineServices for StubServices {
    async fn fetch_metadata(&self, locator: &RepoLocator) -> Result<RepoMetadata, AppError> {
        Ok(RepoMetadata {
            owner: locator.owner.clone(),
            name: locator.name.clone(),
            default_branch: "main".to_string(),
            description: Some("test repository".to_string()),
            languages: BTreeMap::from([("Python".to_string(), 1000u64)]),
        })
    }

    async fn fetch_tree(
        &self,
        _locator: &RepoLocator,
        _branch: &str,
    ) -> Result<Vec<BlobEntry>, AppError> {
        if self.fail_tree_with_rate_limit {
            return Err(AppError::RateLimitedHost("api.github.com".to_string()));
        }
        Ok(self.entries.clone())
    }

    async fn fetch_blob(&self, _locator: &RepoLocator, sha: &str) -> Result<String, AppError> {
        self.blobs
            .get(sha)
            .cloned()
            .ok_or_else(|| AppError::Processing(format!("unknown blob {sha}")))
    }

    async fn summarize_file(&self, file: &RepoFile) -> Result<String, AppError> {
        if self.failing_summaries.contains(&file.path) {
            return Err(AppError::LlmFailure("synthetic summary failure".to_string()));
        }
        Ok(format!("Summary of {}", file.path))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| hashed_vector(t)).collect())
    }

    fn embedding_dimension(&self) -> Option<usize> {
        Some(TEST_DIMENSION)
    }

    async fn overview(
        &self,
        repo_name: &str,
        file_summaries: &[(String, String)],
    ) -> Result<String, AppError> {
        Ok(format!(
            "Overview of {repo_name} built from {} summaries",
            file_summaries.len()
        ))
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        store_uri: "mem://".to_string(),
        database_name: "test".to_string(),
        store_namespace: "test".to_string(),
        store_username: "root".to_string(),
        store_password: "root".to_string(),
        http_port: 0,
        source_host_token: None,
        ai_api_key: Some("sk-test".to_string()),
        ai_provider: Some("openai".to_string()),
        ai_model: Some("gpt-4o-mini".to_string()),
        embedding_provider: None,
        embedding_model: "text-embedding-3-small".to_string(),
        api_key: None,
        env: RuntimeEnv::Development,
    }
}

async fn setup_ingestion(
    services: StubServices,
) -> (Arc<SurrealDbClient>, IngestionPipeline, ProcessingTask, String) {
    let db = Arc::new(
        SurrealDbClient::memory("pipeline_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db"),
    );
    db.ensure_initialized(TEST_DIMENSION)
        .await
        .expect("indexes");

    let session = Session::new();
    db.store_item(session.clone()).await.expect("store session");

    let repo = Repository::new(
        session.id.clone(),
        "https://github.com/acme/widget".to_string(),
        "acme".to_string(),
        "widget".to_string(),
    );
    let repo_id = repo.id.clone();
    db.store_item(repo).await.expect("store repo");

    let mut task = ProcessingTask::new(repo_id.clone());
    task.status = TaskStatus::InProgress;
    db.store_item(task.clone()).await.expect("store task");

    let pipeline = IngestionPipeline::with_services(
        Arc::clone(&db),
        test_config(),
        PipelineTuning {
            bucket_size: 2,
            ..PipelineTuning::default()
        },
        Arc::new(services),
    );

    (db, pipeline, task, repo_id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_file_repo_ingests_end_to_end() {
    let services = StubServices::for_files(&[
        ("a.py", "import b\n\ndef main():\n    return b.run()\n"),
        ("b.py", "def run():\n    return 1\n"),
    ]);
    let (db, pipeline, task, repo_id) = setup_ingestion(services).await;

    pipeline.process_task(task.clone()).await.expect("pipeline");

    let repo = Repository::get_required(&repo_id, &db).await.expect("repo");
    assert_eq!(repo.status, RepositoryStatus::Completed);
    assert_eq!(repo.file_count, 2);
    assert_eq!(repo.default_branch, "main");
    assert_eq!(repo.embedding_dimensions, Some(TEST_DIMENSION as u64));
    assert!(repo
        .overview
        .as_deref()
        .is_some_and(|o| o.contains("widget")));
    assert!(repo.overview_embedding.is_some());

    // Dependency inversion per the two-file scenario.
    let a = RepoFile::get_by_path(&repo_id, "a.py", &db)
        .await
        .expect("query a.py")
        .expect("a.py present");
    assert!(a.parsed);
    assert_eq!(a.dependencies.imports, vec!["b.py".to_string()]);
    assert!(a.summary.as_deref().is_some_and(|s| s.contains("a.py")));
    assert!(a.summary_vector.is_some());

    let b = RepoFile::get_by_path(&repo_id, "b.py", &db)
        .await
        .expect("query b.py")
        .expect("b.py present");
    assert_eq!(b.dependencies.imported_by, vec!["a.py".to_string()]);

    // One chunk per extracted function, embedded at the stub dimension.
    let chunks = FileChunk::list_for_file(&b.id, &db).await.expect("chunks");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_name, "run");
    assert_eq!(chunks[0].vector.len(), TEST_DIMENSION);

    let stored_task = ProcessingTask::get_required(&task.id, &db)
        .await
        .expect("task");
    assert_eq!(stored_task.status, TaskStatus::Completed);
    assert_eq!(stored_task.progress.current_step, TaskStep::Completed);
    assert_eq!(stored_task.progress.total_files, 2);
    assert_eq!(stored_task.progress.processed_files, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_repository_completes_with_fixed_overview() {
    let services = StubServices::for_files(&[]);
    let (db, pipeline, task, repo_id) = setup_ingestion(services).await;

    pipeline.process_task(task.clone()).await.expect("pipeline");

    let repo = Repository::get_required(&repo_id, &db).await.expect("repo");
    assert_eq!(repo.status, RepositoryStatus::Completed);
    assert_eq!(repo.file_count, 0);
    assert_eq!(repo.overview.as_deref(), Some(EMPTY_REPO_OVERVIEW));
    assert!(repo.overview_embedding.is_none());

    let stored_task = ProcessingTask::get_required(&task.id, &db)
        .await
        .expect("task");
    assert_eq!(stored_task.status, TaskStatus::Completed);
    assert_eq!(stored_task.progress.total_files, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_file_summary_failure_does_not_abort() {
    let mut services = StubServices::for_files(&[
        ("a.py", "import b\n\ndef main():\n    return b.run()\n"),
        ("b.py", "def run():\n    return 1\n"),
    ]);
    services.failing_summaries.insert("a.py".to_string());
    let (db, pipeline, task, repo_id) = setup_ingestion(services).await;

    pipeline.process_task(task).await.expect("pipeline");

    let repo = Repository::get_required(&repo_id, &db).await.expect("repo");
    assert_eq!(repo.status, RepositoryStatus::Completed);

    let a = RepoFile::get_by_path(&repo_id, "a.py", &db)
        .await
        .expect("query a.py")
        .expect("a.py present");
    assert!(a.summary.is_none());
    assert!(a
        .error
        .as_deref()
        .is_some_and(|e| e.contains("summary failed")));

    let b = RepoFile::get_by_path(&repo_id, "b.py", &db)
        .await
        .expect("query b.py")
        .expect("b.py present");
    assert!(b.summary.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn host_rate_limit_fails_task_and_repository() {
    let mut services = StubServices::for_files(&[("a.py", "x = 1\n")]);
    services.fail_tree_with_rate_limit = true;
    let (db, pipeline, task, repo_id) = setup_ingestion(services).await;

    let result = pipeline.process_task(task.clone()).await;
    assert!(matches!(result, Err(AppError::RateLimitedHost(_))));

    let repo = Repository::get_required(&repo_id, &db).await.expect("repo");
    assert_eq!(repo.status, RepositoryStatus::Failed);
    assert!(repo
        .error_message
        .as_deref()
        .is_some_and(|e| e.contains("rate_limited_host")));

    let stored_task = ProcessingTask::get_required(&task.id, &db)
        .await
        .expect("task");
    assert_eq!(stored_task.status, TaskStatus::Failed);
    // Failure freezes the step where it happened.
    assert_eq!(stored_task.progress.current_step, TaskStep::Fetching);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unparseable_file_still_gets_summary_and_embedding() {
    let services = StubServices::for_files(&[("notes.md", "# Design notes\n\nImportant text.\n")]);
    let (db, pipeline, task, repo_id) = setup_ingestion(services).await;

    pipeline.process_task(task).await.expect("pipeline");

    let file = RepoFile::get_by_path(&repo_id, "notes.md", &db)
        .await
        .expect("query notes.md")
        .expect("notes.md present");
    assert!(!file.parsed);
    assert!(file.functions.is_empty());
    assert!(file.summary.is_some());
    assert!(file.summary_vector.is_some());

    let repo = Repository::get_required(&repo_id, &db).await.expect("repo");
    assert_eq!(repo.status, RepositoryStatus::Completed);
}
