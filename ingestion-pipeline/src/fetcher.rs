//! Source-host client: resolves a repository URL to metadata, a recursive
//! blob tree and per-blob content against the GitHub REST API.
//!
//! Blob fetches run under a bounded semaphore and every request retries with
//! exponential backoff; documented rate-limit signals surface as
//! `AppError::RateLimitedHost` so the pipeline stalls instead of failing one
//! file at a time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, warn};

use common::error::AppError;
pub use common::utils::source_url::{parse_repo_url, RepoLocator};

use crate::parser::display_language_for_path;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "codemap-ingest";
/// Default ceiling for a single blob.
pub const DEFAULT_BLOB_SIZE_LIMIT: u64 = 1024 * 1024;
/// Vendored lockfiles above this size carry no signal worth embedding.
const LOCKFILE_SIZE_LIMIT: u64 = 64 * 1024;
const TRANSPORT_RETRIES: usize = 3;
const RATE_LIMIT_RETRIES: usize = 5;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

const LOCKFILE_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

#[derive(Debug, Clone)]
pub struct RepoMetadata {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub description: Option<String>,
    pub languages: BTreeMap<String, u64>,
}

/// A text-eligible blob from the recursive tree listing.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub path: String,
    pub sha: String,
    pub size: u64,
    pub language: Option<String>,
}

/// Extension/size policy for blob inclusion.
pub fn is_text_eligible(path: &str, size: u64, blob_size_limit: u64) -> bool {
    if size > blob_size_limit {
        return false;
    }

    let filename = path.rsplit('/').next().unwrap_or(path);
    if LOCKFILE_NAMES.contains(&filename) && size > LOCKFILE_SIZE_LIMIT {
        return false;
    }

    display_language_for_path(path).is_some()
}

pub struct SourceFetcher {
    http: reqwest::Client,
    token: Option<String>,
    permits: Arc<Semaphore>,
    blob_size_limit: u64,
}

impl SourceFetcher {
    pub fn new(token: Option<String>) -> Self {
        Self::with_limits(token, DEFAULT_FETCH_CONCURRENCY, DEFAULT_BLOB_SIZE_LIMIT)
    }

    pub fn with_limits(token: Option<String>, concurrency: usize, blob_size_limit: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            blob_size_limit,
        }
    }

    pub fn blob_size_limit(&self) -> u64 {
        self.blob_size_limit
    }

    /// Repository metadata plus the host's language histogram.
    pub async fn fetch_metadata(&self, locator: &RepoLocator) -> Result<RepoMetadata, AppError> {
        #[derive(Deserialize)]
        struct OwnerResponse {
            login: String,
        }

        #[derive(Deserialize)]
        struct RepoResponse {
            name: String,
            owner: OwnerResponse,
            default_branch: String,
            description: Option<String>,
        }

        let repo: RepoResponse = self
            .get_json(&format!(
                "{API_BASE}/repos/{}/{}",
                locator.owner, locator.name
            ))
            .await?;

        let languages: BTreeMap<String, u64> = self
            .get_json(&format!(
                "{API_BASE}/repos/{}/{}/languages",
                locator.owner, locator.name
            ))
            .await
            .unwrap_or_default();

        Ok(RepoMetadata {
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo.default_branch,
            description: repo.description,
            languages,
        })
    }

    /// Recursive tree listing filtered down to text-eligible blobs.
    pub async fn fetch_tree(
        &self,
        locator: &RepoLocator,
        branch: &str,
    ) -> Result<Vec<BlobEntry>, AppError> {
        #[derive(Deserialize)]
        struct TreeItem {
            path: String,
            #[serde(rename = "type")]
            kind: String,
            sha: String,
            #[serde(default)]
            size: u64,
        }

        #[derive(Deserialize)]
        struct TreeResponse {
            tree: Vec<TreeItem>,
            #[serde(default)]
            truncated: bool,
        }

        let response: TreeResponse = self
            .get_json(&format!(
                "{API_BASE}/repos/{}/{}/git/trees/{}?recursive=1",
                locator.owner, locator.name, branch
            ))
            .await?;

        if response.truncated {
            warn!(
                owner = %locator.owner,
                name = %locator.name,
                "tree listing truncated by the host; ingesting the returned subset"
            );
        }

        let entries: Vec<BlobEntry> = response
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob")
            .filter(|item| is_text_eligible(&item.path, item.size, self.blob_size_limit))
            .map(|item| BlobEntry {
                language: display_language_for_path(&item.path).map(str::to_string),
                path: item.path,
                sha: item.sha,
                size: item.size,
            })
            .collect();

        debug!(
            owner = %locator.owner,
            name = %locator.name,
            blob_count = entries.len(),
            "tree listing filtered"
        );

        Ok(entries)
    }

    /// Raw content of one blob; UTF-8 only, anything else is a per-file
    /// error for the caller to record.
    pub async fn fetch_blob(&self, locator: &RepoLocator, sha: &str) -> Result<String, AppError> {
        #[derive(Deserialize)]
        struct BlobResponse {
            content: String,
            encoding: String,
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("fetcher semaphore closed".to_string()))?;

        let blob: BlobResponse = self
            .get_json(&format!(
                "{API_BASE}/repos/{}/{}/git/blobs/{sha}",
                locator.owner, locator.name
            ))
            .await?;

        if blob.encoding != "base64" {
            return Err(AppError::Processing(format!(
                "unexpected blob encoding '{}'",
                blob.encoding
            )));
        }

        let compact: String = blob.content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| AppError::Processing(format!("blob base64 decode failed: {e}")))?;

        String::from_utf8(bytes)
            .map_err(|_| AppError::Processing("blob is not valid UTF-8".to_string()))
    }

    /// One GET with the standard retry discipline: jittered backoff for
    /// transport errors and 5xx, longer backoff for rate-limit signals.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let mut transport_delays = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(TRANSPORT_RETRIES);
        let mut rate_limit_delays = ExponentialBackoff::from_millis(1000)
            .max_delay(Duration::from_secs(60))
            .take(RATE_LIMIT_RETRIES);

        loop {
            let mut request = self
                .http
                .get(url)
                .header(header::USER_AGENT, USER_AGENT)
                .header(header::ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(AppError::from);
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(AppError::RepoNotFound(url.to_string()));
                    }
                    if status == StatusCode::UNAUTHORIZED {
                        return Err(AppError::Auth(
                            "source host rejected the configured token".to_string(),
                        ));
                    }
                    if is_rate_limited(status, &response) {
                        RequestOutcome::RateLimited
                    } else if status.is_server_error() {
                        RequestOutcome::Transport(format!("{url}: HTTP {status}"))
                    } else {
                        return Err(AppError::Processing(format!("{url}: HTTP {status}")));
                    }
                }
                Err(err) if err.is_connect() || err.is_timeout() || err.is_request() => {
                    RequestOutcome::Transport(err.to_string())
                }
                Err(err) => return Err(AppError::from(err)),
            };

            match outcome {
                RequestOutcome::Transport(detail) => match transport_delays.next() {
                    Some(delay) => {
                        warn!(%url, %detail, delay_ms = delay.as_millis() as u64, "transport error, retrying");
                        sleep(delay).await;
                    }
                    None => {
                        return Err(AppError::Processing(format!(
                            "source host unreachable: {detail}"
                        )))
                    }
                },
                RequestOutcome::RateLimited => match rate_limit_delays.next() {
                    Some(delay) => {
                        warn!(%url, delay_ms = delay.as_millis() as u64, "host rate limit, backing off");
                        sleep(delay).await;
                    }
                    None => return Err(AppError::RateLimitedHost(url.to_string())),
                },
            }
        }
    }
}

enum RequestOutcome {
    Transport(String),
    RateLimited,
}

fn is_rate_limited(status: StatusCode, response: &reqwest::Response) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }

    status == StatusCode::FORBIDDEN
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0")
}
