use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{api_state::ApiState, error::ApiError};

/// `X-API-Key` check for the write-side endpoints. Development skips the
/// check entirely; production requires a configured key and an exact match.
pub async fn api_auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.is_development() {
        return Ok(next.run(request).await);
    }

    let Some(expected) = state.config.api_key.as_deref() else {
        return Err(ApiError::unauthorized("API key is not configured"));
    };

    let provided = extract_api_key(&request)
        .ok_or_else(|| ApiError::unauthorized("You have to be authenticated"))?;

    if provided != expected {
        return Err(ApiError::unauthorized("You have to be authenticated"));
    }

    Ok(next.run(request).await)
}

fn extract_api_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
