use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),
    #[error("Repository not found: {0}")]
    RepoNotFound(String),
    #[error("Source host rate limit: {0}")]
    RateLimitedHost(String),
    #[error("LLM provider rate limit: {0}")]
    RateLimitedLlm(String),
    #[error("LLM provider rejected credentials: {0}")]
    UnauthorizedLlm(String),
    #[error("LLM failure: {0}")]
    LlmFailure(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Wire-level error kind used in HTTP error bodies and task records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidUrl(_) => "invalid_input",
            Self::NotFound(_) | Self::RepoNotFound(_) => "not_found",
            Self::Auth(_) => "unauthorized",
            Self::UnauthorizedLlm(_) => "unauthorized_llm",
            Self::RateLimitedLlm(_) => "rate_limited_llm",
            Self::RateLimitedHost(_) => "rate_limited_host",
            Self::OpenAI(_) | Self::LlmFailure(_) | Self::LLMParsing(_) => "llm_failure",
            _ => "internal",
        }
    }

    /// Errors that must stop an entire ingestion rather than a single file.
    pub fn is_stage_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::RepoNotFound(_)
                | Self::RateLimitedHost(_)
                | Self::RateLimitedLlm(_)
                | Self::UnauthorizedLlm(_)
                | Self::Auth(_)
                | Self::Database(_)
        )
    }
}
