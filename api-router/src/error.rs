use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;

/// Wire-level API error: `{"error": {"kind", "message"}}` with the HTTP
/// status derived from the error kind.
#[derive(Debug, Clone)]
pub struct ApiError {
    kind: &'static str,
    message: String,
    status: StatusCode,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: "unauthorized",
            message: message.into(),
            status: StatusCode::UNAUTHORIZED,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let kind = err.kind();
        let (status, message) = match kind {
            "invalid_input" | "unauthorized_llm" => (StatusCode::BAD_REQUEST, err.to_string()),
            "not_found" => (StatusCode::NOT_FOUND, err.to_string()),
            "unauthorized" => (StatusCode::UNAUTHORIZED, err.to_string()),
            "rate_limited_llm" | "rate_limited_host" | "llm_failure" => {
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            _ => {
                // Internal details never reach clients.
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        Self {
            kind,
            message,
            status,
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize, Debug)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind,
                message: self.message,
            },
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn kinds_map_to_spec_status_codes() {
        assert_eq!(
            status_of(AppError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::InvalidUrl("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::NotFound("missing".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::UnauthorizedLlm("key".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::RateLimitedHost("github".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(AppError::LlmFailure("boom".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(AppError::InternalError("secret".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let api_error = ApiError::from(AppError::InternalError("db password wrong".into()));
        assert_eq!(api_error.message, "Internal server error");
        assert_eq!(api_error.kind(), "internal");
    }
}
