use std::sync::Mutex;
use std::time::{Duration, Instant};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::processing_task::ProcessingTask},
};
use tracing::debug;

/// Coalesces per-file progress ticks into at most one durable write per
/// interval. The underlying store write is idempotent and monotone, so a
/// stale flush can never move progress backwards.
pub struct ProgressTracker {
    task_id: String,
    interval: Duration,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    processed: u64,
    total: Option<u64>,
    last_write: Option<Instant>,
    dirty: bool,
}

impl ProgressTracker {
    pub fn new(task_id: String, interval: Duration) -> Self {
        Self {
            task_id,
            interval,
            state: Mutex::new(ProgressState {
                processed: 0,
                total: None,
                last_write: None,
                dirty: false,
            }),
        }
    }

    pub async fn set_total(&self, total: u64, db: &SurrealDbClient) -> Result<(), AppError> {
        {
            let mut state = self.lock();
            state.total = Some(total);
            state.dirty = true;
        }
        self.flush(db).await
    }

    /// Record completed files; writes through only when the coalescing
    /// window has elapsed.
    pub async fn record(&self, completed: u64, db: &SurrealDbClient) -> Result<(), AppError> {
        let due = {
            let mut state = self.lock();
            state.processed = state.processed.saturating_add(completed);
            state.dirty = true;
            state
                .last_write
                .is_none_or(|last| last.elapsed() >= self.interval)
        };

        if due {
            self.flush(db).await?;
        }

        Ok(())
    }

    /// Force the pending counters out; called at bucket and stage ends.
    pub async fn flush(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let (processed, total) = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.last_write = Some(Instant::now());
            (state.processed, state.total)
        };

        debug!(task_id = %self.task_id, processed, ?total, "progress flush");
        ProcessingTask::update_progress(&self.task_id, processed, total, db).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::processing_task::TaskStatus;
    use uuid::Uuid;

    async fn setup() -> (SurrealDbClient, ProcessingTask) {
        let db = SurrealDbClient::memory("progress_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        let mut task = ProcessingTask::new("repo-1".to_string());
        task.status = TaskStatus::InProgress;
        db.store_item(task.clone()).await.expect("store task");
        (db, task)
    }

    #[tokio::test]
    async fn coalesces_rapid_ticks_into_few_writes() {
        let (db, task) = setup().await;
        let tracker = ProgressTracker::new(task.id.clone(), Duration::from_secs(3600));

        tracker.set_total(10, &db).await.expect("set total");
        for _ in 0..5 {
            tracker.record(1, &db).await.expect("record");
        }

        // With a huge interval only the set_total flush went through, plus
        // the first record (no prior write timestamp at that point).
        let stored = ProcessingTask::get_required(&task.id, &db)
            .await
            .expect("fetch");
        assert!(stored.progress.processed_files < 5);

        tracker.flush(&db).await.expect("flush");
        let stored = ProcessingTask::get_required(&task.id, &db)
            .await
            .expect("fetch");
        assert_eq!(stored.progress.processed_files, 5);
        assert_eq!(stored.progress.total_files, 10);
    }

    #[tokio::test]
    async fn flush_without_changes_is_a_noop() {
        let (db, task) = setup().await;
        let tracker = ProgressTracker::new(task.id.clone(), Duration::from_millis(0));

        tracker.flush(&db).await.expect("flush clean state");

        let stored = ProcessingTask::get_required(&task.id, &db)
            .await
            .expect("fetch");
        assert_eq!(stored.progress.processed_files, 0);
    }
}
