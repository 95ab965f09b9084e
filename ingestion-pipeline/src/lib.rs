#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod fetcher;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod resolver;

use common::storage::{db::SurrealDbClient, types::processing_task::ProcessingTask};
pub use pipeline::{IngestionPipeline, PipelineServices, PipelineTuning};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use uuid::Uuid;

/// Claim-and-process loop. Multiple workers may share a store; the claim is
/// atomic so each task runs exactly once.
pub fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<(), Box<dyn std::error::Error>>> + Send>,
> {
    Box::pin(async move {
        let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
        let idle_backoff = Duration::from_millis(500);

        loop {
            match ProcessingTask::claim_next_pending(&db, &worker_id).await {
                Ok(Some(task)) => {
                    let task_id = task.id.clone();
                    info!(%worker_id, %task_id, repo_id = %task.repo_id, "claimed ingestion task");
                    if let Err(err) = ingestion_pipeline.process_task(task).await {
                        error!(%worker_id, %task_id, error = %err, "ingestion task failed");
                    }
                }
                Ok(None) => {
                    sleep(idle_backoff).await;
                }
                Err(err) => {
                    error!(%worker_id, error = %err, "failed to claim ingestion task");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}
