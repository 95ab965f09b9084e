use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::processing_task::ProcessingTask},
};
use tracing::error;

use super::{config::PipelineTuning, progress::ProgressTracker, services::PipelineServices};

/// Shared state threaded through every stage of one ingestion run.
pub struct PipelineContext<'a> {
    pub task: &'a ProcessingTask,
    pub task_id: String,
    pub repo_id: String,
    pub db: &'a SurrealDbClient,
    pub tuning: &'a PipelineTuning,
    pub services: &'a dyn PipelineServices,
    pub progress: ProgressTracker,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        task: &'a ProcessingTask,
        db: &'a SurrealDbClient,
        tuning: &'a PipelineTuning,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let task_id = task.id.clone();
        let repo_id = task.repo_id.clone();
        let progress = ProgressTracker::new(task_id.clone(), tuning.progress_interval);

        Self {
            task,
            task_id,
            repo_id,
            db,
            tuning,
            services,
            progress,
        }
    }

    pub fn abort(&self, err: AppError) -> AppError {
        error!(
            task_id = %self.task_id,
            repo_id = %self.repo_id,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
