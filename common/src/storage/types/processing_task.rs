#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ProcessFiles,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Pipeline steps in execution order. A task's step only ever advances;
/// failure freezes it in place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStep {
    Queued,
    Fetching,
    Parsing,
    Embedding,
    Summarizing,
    Overview,
    Finalizing,
    Completed,
}

impl TaskStep {
    pub const fn order(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Fetching => 1,
            Self::Parsing => 2,
            Self::Embedding => 3,
            Self::Summarizing => 4,
            Self::Overview => 5,
            Self::Finalizing => 6,
            Self::Completed => 7,
        }
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Embedding => "embedding",
            Self::Summarizing => "summarizing",
            Self::Overview => "overview",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProgress {
    pub total_files: u64,
    pub processed_files: u64,
    pub current_step: TaskStep,
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self {
            total_files: 0,
            processed_files: 0,
            current_step: TaskStep::Queued,
        }
    }
}

stored_object!(ProcessingTask, "processing_task", {
    repo_id: String,
    kind: TaskKind,
    status: TaskStatus,
    progress: TaskProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>
});

impl ProcessingTask {
    pub fn new(repo_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            repo_id,
            kind: TaskKind::ProcessFiles,
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            claimed_by: None,
            error: None,
            result: None,
        }
    }

    pub async fn get_required(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {id} not found")))
    }

    /// Atomically claim the oldest pending task for a worker.
    pub async fn claim_next_pending(
        db: &SurrealDbClient,
        worker_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "LET $next = (SELECT VALUE id FROM type::table($table) \
                     WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1)[0];
                 IF $next != NONE THEN
                     (UPDATE $next SET status = 'in_progress', claimed_by = $worker_id, \
                      updated_at = time::now() RETURN AFTER)
                 ELSE
                     []
                 END;",
            )
            .bind(("table", Self::table_name()))
            .bind(("worker_id", worker_id.to_string()))
            .await?;

        let claimed: Vec<Self> = response.take(1)?;
        Ok(claimed.into_iter().next())
    }

    /// Advance the step label. Writes are dropped when they would move the
    /// step backwards, keeping observations monotone under reordering.
    pub async fn advance_step(
        id: &str,
        step: TaskStep,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let current = Self::get_required(id, db).await?;
        if current.status != TaskStatus::InProgress
            || step.order() <= current.progress.current_step.order()
        {
            return Ok(());
        }

        let _task: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/progress/current_step", step))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    /// Idempotent progress write. `processed_files` is clamped to be
    /// monotonically non-decreasing and never exceeds `total_files` once the
    /// total is known.
    pub async fn update_progress(
        id: &str,
        processed_files: u64,
        total_files: Option<u64>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let current = Self::get_required(id, db).await?;
        let total = total_files.unwrap_or(current.progress.total_files);
        let mut processed = processed_files.max(current.progress.processed_files);
        if total > 0 {
            processed = processed.min(total);
        }

        let _task: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/progress/total_files", total))
            .patch(PatchOp::replace("/progress/processed_files", processed))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    pub async fn mark_completed(
        id: &str,
        result: Option<serde_json::Value>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut update = db
            .update::<Option<Self>>((Self::table_name(), id))
            .patch(PatchOp::replace("/status", TaskStatus::Completed))
            .patch(PatchOp::replace(
                "/progress/current_step",
                TaskStep::Completed,
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ));
        if let Some(result) = result {
            update = update.patch(PatchOp::replace("/result", result));
        }
        let _task: Option<Self> = update.await?;

        Ok(())
    }

    /// Terminal failure: freezes the current step and records the error.
    pub async fn mark_failed(id: &str, error: String, db: &SurrealDbClient) -> Result<(), AppError> {
        let _task: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", TaskStatus::Failed))
            .patch(PatchOp::replace("/error", error))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in_progress_task(db: &SurrealDbClient) -> ProcessingTask {
        let mut task = ProcessingTask::new("repo-1".to_string());
        task.status = TaskStatus::InProgress;
        db.store_item(task.clone()).await.expect("store task");
        task
    }

    #[test]
    fn step_order_is_total() {
        let steps = [
            TaskStep::Queued,
            TaskStep::Fetching,
            TaskStep::Parsing,
            TaskStep::Embedding,
            TaskStep::Summarizing,
            TaskStep::Overview,
            TaskStep::Finalizing,
            TaskStep::Completed,
        ];
        for pair in steps.windows(2) {
            assert!(pair[0].order() < pair[1].order());
        }
    }

    #[tokio::test]
    async fn test_claim_next_pending_is_fifo_and_exclusive() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut first = ProcessingTask::new("repo-1".to_string());
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        first.updated_at = first.created_at;
        let second = ProcessingTask::new("repo-2".to_string());

        db.store_item(first.clone()).await.expect("store first");
        db.store_item(second.clone()).await.expect("store second");

        let claimed = ProcessingTask::claim_next_pending(&db, "worker-a")
            .await
            .expect("claim")
            .expect("task available");
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));

        let claimed_again = ProcessingTask::claim_next_pending(&db, "worker-b")
            .await
            .expect("claim")
            .expect("second task available");
        assert_eq!(claimed_again.id, second.id);

        let none_left = ProcessingTask::claim_next_pending(&db, "worker-c")
            .await
            .expect("claim");
        assert!(none_left.is_none());
    }

    #[tokio::test]
    async fn test_advance_step_is_monotone() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let task = store_in_progress_task(&db).await;

        ProcessingTask::advance_step(&task.id, TaskStep::Parsing, &db)
            .await
            .expect("advance to parsing");

        // A stale write for an earlier step must be dropped
        ProcessingTask::advance_step(&task.id, TaskStep::Fetching, &db)
            .await
            .expect("stale advance");

        let fetched = ProcessingTask::get_required(&task.id, &db)
            .await
            .expect("fetch");
        assert_eq!(fetched.progress.current_step, TaskStep::Parsing);
    }

    #[tokio::test]
    async fn test_update_progress_monotone_and_capped() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let task = store_in_progress_task(&db).await;

        ProcessingTask::update_progress(&task.id, 5, Some(10), &db)
            .await
            .expect("first progress");
        // Duplicate/late write with a lower count must not regress
        ProcessingTask::update_progress(&task.id, 3, None, &db)
            .await
            .expect("stale progress");
        // Progress can never exceed the total
        ProcessingTask::update_progress(&task.id, 42, None, &db)
            .await
            .expect("over-count progress");

        let fetched = ProcessingTask::get_required(&task.id, &db)
            .await
            .expect("fetch");
        assert_eq!(fetched.progress.total_files, 10);
        assert_eq!(fetched.progress.processed_files, 10);
    }

    #[tokio::test]
    async fn test_mark_failed_freezes_step() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let task = store_in_progress_task(&db).await;
        ProcessingTask::advance_step(&task.id, TaskStep::Embedding, &db)
            .await
            .expect("advance");

        ProcessingTask::mark_failed(&task.id, "rate_limited_llm".to_string(), &db)
            .await
            .expect("mark failed");

        // Steps no longer advance on a failed task
        ProcessingTask::advance_step(&task.id, TaskStep::Overview, &db)
            .await
            .expect("advance after failure");

        let fetched = ProcessingTask::get_required(&task.id, &db)
            .await
            .expect("fetch");
        assert_eq!(fetched.status, TaskStatus::Failed);
        assert_eq!(fetched.progress.current_step, TaskStep::Embedding);
        assert_eq!(fetched.error.as_deref(), Some("rate_limited_llm"));
    }
}
