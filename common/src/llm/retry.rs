use std::future::Future;
use std::time::Duration;

use async_openai::error::OpenAIError;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::warn;

use crate::error::AppError;

const TRANSPORT_RETRIES: usize = 3;
const RATE_LIMIT_RETRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorClass {
    Transport,
    RateLimited,
    Unauthorized,
    Fatal,
}

pub fn classify(err: &OpenAIError) -> LlmErrorClass {
    match err {
        OpenAIError::Reqwest(_) => LlmErrorClass::Transport,
        OpenAIError::StreamError(message) => {
            if mentions_rate_limit(message) {
                LlmErrorClass::RateLimited
            } else {
                LlmErrorClass::Transport
            }
        }
        OpenAIError::ApiError(api) => {
            let descriptor = format!(
                "{} {}",
                api.r#type.as_deref().unwrap_or_default(),
                api.message
            );
            if mentions_rate_limit(&descriptor) {
                LlmErrorClass::RateLimited
            } else if mentions_bad_credentials(&descriptor) {
                LlmErrorClass::Unauthorized
            } else {
                LlmErrorClass::Fatal
            }
        }
        _ => LlmErrorClass::Fatal,
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("429")
}

fn mentions_bad_credentials(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("authentication")
        || lower.contains("unauthorized")
}

/// Run a provider call with the standard retry policy: up to 3 jittered
/// retries on transport errors, up to 5 backed-off retries on rate limits,
/// immediate failure on schema or credential errors.
pub async fn call_with_retries<T, Fut, F>(label: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OpenAIError>>,
{
    let mut transport_delays = ExponentialBackoff::from_millis(100)
        .max_delay(Duration::from_secs(2))
        .map(jitter)
        .take(TRANSPORT_RETRIES);
    let mut rate_limit_delays = ExponentialBackoff::from_millis(500)
        .max_delay(Duration::from_secs(30))
        .take(RATE_LIMIT_RETRIES);

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match classify(&err) {
            LlmErrorClass::Transport => match transport_delays.next() {
                Some(delay) => {
                    warn!(%label, error = %err, delay_ms = delay.as_millis() as u64, "transport error, retrying");
                    sleep(delay).await;
                }
                None => return Err(AppError::LlmFailure(format!("{label}: {err}"))),
            },
            LlmErrorClass::RateLimited => match rate_limit_delays.next() {
                Some(delay) => {
                    warn!(%label, error = %err, delay_ms = delay.as_millis() as u64, "provider rate limit, backing off");
                    sleep(delay).await;
                }
                None => return Err(AppError::RateLimitedLlm(format!("{label}: {err}"))),
            },
            LlmErrorClass::Unauthorized => {
                return Err(AppError::UnauthorizedLlm(format!("{label}: {err}")))
            }
            LlmErrorClass::Fatal => return Err(AppError::OpenAI(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api_error(message: &str, kind: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: kind.map(str::to_string),
            param: None,
            code: None,
        })
    }

    #[test]
    fn classifies_rate_limits() {
        let err = api_error("Rate limit reached for requests", Some("requests"));
        assert_eq!(classify(&err), LlmErrorClass::RateLimited);
    }

    #[test]
    fn classifies_bad_credentials() {
        let err = api_error("Incorrect API key provided", Some("invalid_request_error"));
        assert_eq!(classify(&err), LlmErrorClass::Unauthorized);
    }

    #[test]
    fn classifies_schema_errors_as_fatal() {
        let err = api_error("Unknown parameter: tools[0].shape", None);
        assert_eq!(classify(&err), LlmErrorClass::Fatal);
    }

    #[tokio::test]
    async fn retries_rate_limits_then_succeeds() {
        let attempts = AtomicUsize::new(0);

        let result = call_with_retries("test", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(api_error("rate limit exceeded", None))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.expect("should succeed after retries"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unauthorized_fails_without_retry() {
        let attempts = AtomicUsize::new(0);

        let result: Result<u32, _> = call_with_retries("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(api_error("invalid api key", None)) }
        })
        .await;

        assert!(matches!(result, Err(AppError::UnauthorizedLlm(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_maps_to_rate_limited_llm() {
        let result: Result<u32, _> = call_with_retries("test", || async {
            Err(api_error("rate limit exceeded", None))
        })
        .await;

        assert!(matches!(result, Err(AppError::RateLimitedLlm(_))));
    }
}
