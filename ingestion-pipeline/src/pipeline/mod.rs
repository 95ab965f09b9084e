mod config;
mod context;
mod progress;
mod services;
mod stages;

pub use config::PipelineTuning;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    llm::RequestContext,
    storage::{
        db::SurrealDbClient,
        types::{
            processing_task::{ProcessingTask, TaskStep},
            repository::{Repository, RepositoryStatus},
            session::Session,
        },
    },
    utils::config::AppConfig,
};
use tracing::{info, warn};

use self::{
    context::PipelineContext,
    stages::{
        chunk_embedding_stage, dependency_stage, fetch_stage, finalize_stage, overview_stage,
        parse_stage, summarize_stage, summary_embedding_stage,
    },
};

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    config: AppConfig,
    tuning: PipelineTuning,
    services_override: Option<Arc<dyn PipelineServices>>,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, config: AppConfig) -> Self {
        Self {
            db,
            config,
            tuning: PipelineTuning::default(),
            services_override: None,
        }
    }

    /// Inject collaborators directly; used by tests to run without network.
    pub fn with_services(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        tuning: PipelineTuning,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            config,
            tuning,
            services_override: Some(services),
        }
    }

    /// Build provider-bound collaborators from the owning session's
    /// preferences; sessions may use different providers concurrently.
    async fn services_for(&self, repo: &Repository) -> Result<Arc<dyn PipelineServices>, AppError> {
        if let Some(services) = &self.services_override {
            return Ok(Arc::clone(services));
        }

        let session = Session::get_required(&repo.session_id, &self.db).await?;
        let preferences = session.preferences.as_ref();
        let chat_ctx = RequestContext::for_chat(preferences, &self.config)?;
        let embedding_ctx = RequestContext::for_embedding(preferences, &self.config)?;

        Ok(Arc::new(DefaultPipelineServices::new(
            self.config.source_host_token.clone(),
            chat_ctx,
            &embedding_ctx,
            &self.tuning,
        )))
    }

    #[tracing::instrument(
        skip_all,
        fields(task_id = %task.id, repo_id = %task.repo_id)
    )]
    pub async fn process_task(&self, task: ProcessingTask) -> Result<(), AppError> {
        let repo = Repository::get_required(&task.repo_id, &self.db).await?;
        Repository::transition_status(&repo.id, RepositoryStatus::Processing, None, &self.db)
            .await?;

        let services = match self.services_for(&repo).await {
            Ok(services) => services,
            Err(err) => {
                self.fail(&task, &err).await?;
                return Err(err);
            }
        };

        let ctx = PipelineContext::new(&task, &self.db, &self.tuning, services.as_ref());

        match self.drive_pipeline(&ctx).await {
            Ok(()) => {
                info!(task_id = %ctx.task_id, "ingestion task succeeded");
                Ok(())
            }
            Err(err) => {
                let err = ctx.abort(err);
                self.fail(&task, &err).await?;
                Err(err)
            }
        }
    }

    /// Stage-fatal exit: freeze the task and fail the repository. No
    /// rollback; already-persisted files stay as they are.
    async fn fail(&self, task: &ProcessingTask, err: &AppError) -> Result<(), AppError> {
        let message = format!("{}: {err}", err.kind());
        ProcessingTask::mark_failed(&task.id, message.clone(), &self.db).await?;

        let repo = Repository::get_required(&task.repo_id, &self.db).await?;
        if repo.status.can_transition_to(RepositoryStatus::Failed) {
            Repository::transition_status(
                &task.repo_id,
                RepositoryStatus::Failed,
                Some(message),
                &self.db,
            )
            .await?;
        }

        warn!(task_id = %task.id, repo_id = %task.repo_id, error = %err, "ingestion task failed");
        Ok(())
    }

    async fn drive_pipeline(&self, ctx: &PipelineContext<'_>) -> Result<(), AppError> {
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        fetch_stage(ctx).await?;
        let fetch_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        parse_stage(ctx).await?;
        let parse_duration = stage_start.elapsed();

        // Stage-level fan-out: the three substages read the parsed file set
        // independently and may run concurrently. The step label is advanced
        // here once so concurrent substages never race it backwards.
        let stage_start = Instant::now();
        ProcessingTask::advance_step(&ctx.task_id, TaskStep::Embedding, &self.db).await?;
        tokio::try_join!(
            dependency_stage(ctx),
            chunk_embedding_stage(ctx),
            summarize_stage(ctx),
        )?;
        let fanout_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        summary_embedding_stage(ctx).await?;
        let summary_embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        overview_stage(ctx).await?;
        let overview_duration = stage_start.elapsed();

        finalize_stage(ctx).await?;

        info!(
            task_id = %ctx.task_id,
            total_ms = duration_millis(pipeline_started.elapsed()),
            fetch_ms = duration_millis(fetch_duration),
            parse_ms = duration_millis(parse_duration),
            fanout_ms = duration_millis(fanout_duration),
            summary_embed_ms = duration_millis(summary_embed_duration),
            overview_ms = duration_millis(overview_duration),
            "ingestion pipeline finished"
        );

        Ok(())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
