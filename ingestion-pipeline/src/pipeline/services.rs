use async_trait::async_trait;
use tokio::time::timeout;

use common::{
    error::AppError,
    llm::{LlmClient, RequestContext},
    storage::types::repo_file::RepoFile,
    utils::embedding::Embedder,
};

use crate::{
    fetcher::{BlobEntry, RepoLocator, RepoMetadata, SourceFetcher},
    prompts::{build_overview_request, build_summary_request},
};

use super::config::PipelineTuning;

/// External collaborators of the stage graph, behind one seam so tests can
/// drive the pipeline without network access.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_metadata(&self, locator: &RepoLocator) -> Result<RepoMetadata, AppError>;

    async fn fetch_tree(
        &self,
        locator: &RepoLocator,
        branch: &str,
    ) -> Result<Vec<BlobEntry>, AppError>;

    async fn fetch_blob(&self, locator: &RepoLocator, sha: &str) -> Result<String, AppError>;

    async fn summarize_file(&self, file: &RepoFile) -> Result<String, AppError>;

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    /// Provider embedding dimension, once discovered.
    fn embedding_dimension(&self) -> Option<usize>;

    async fn overview(
        &self,
        repo_name: &str,
        file_summaries: &[(String, String)],
    ) -> Result<String, AppError>;
}

pub struct DefaultPipelineServices {
    fetcher: SourceFetcher,
    llm: LlmClient,
    embedder: Embedder,
    llm_timeout: std::time::Duration,
}

impl DefaultPipelineServices {
    pub fn new(
        source_host_token: Option<String>,
        chat_ctx: RequestContext,
        embedding_ctx: &RequestContext,
        tuning: &PipelineTuning,
    ) -> Self {
        Self {
            fetcher: SourceFetcher::with_limits(
                source_host_token,
                tuning.fetch_concurrency,
                tuning.blob_size_limit,
            ),
            llm: LlmClient::new(chat_ctx),
            embedder: Embedder::new(embedding_ctx),
            llm_timeout: tuning.llm_timeout,
        }
    }

    async fn complete_text(
        &self,
        request: async_openai::types::CreateChatCompletionRequest,
        label: &str,
    ) -> Result<String, AppError> {
        let response = timeout(self.llm_timeout, self.llm.complete(request))
            .await
            .map_err(|_| AppError::LlmFailure(format!("{label} timed out")))??;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing(format!("{label}: no content in response")))
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_metadata(&self, locator: &RepoLocator) -> Result<RepoMetadata, AppError> {
        self.fetcher.fetch_metadata(locator).await
    }

    async fn fetch_tree(
        &self,
        locator: &RepoLocator,
        branch: &str,
    ) -> Result<Vec<BlobEntry>, AppError> {
        self.fetcher.fetch_tree(locator, branch).await
    }

    async fn fetch_blob(&self, locator: &RepoLocator, sha: &str) -> Result<String, AppError> {
        self.fetcher.fetch_blob(locator, sha).await
    }

    async fn summarize_file(&self, file: &RepoFile) -> Result<String, AppError> {
        let request = build_summary_request(self.llm.model(), file)?;
        self.complete_text(request, "file summary").await
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.embedder.embed(texts).await
    }

    fn embedding_dimension(&self) -> Option<usize> {
        self.embedder.dimension()
    }

    async fn overview(
        &self,
        repo_name: &str,
        file_summaries: &[(String, String)],
    ) -> Result<String, AppError> {
        let request = build_overview_request(self.llm.model(), repo_name, file_summaries)?;
        self.complete_text(request, "repository overview").await
    }
}
