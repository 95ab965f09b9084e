use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::storage::types::session::{Session, SessionPreferences};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Serialize)]
pub struct SessionView {
    session_id: String,
    created_at: DateTime<Utc>,
    preferences: Option<SessionPreferences>,
    repositories: Vec<String>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            created_at: session.created_at,
            preferences: session.preferences,
            repositories: session.repositories,
        }
    }
}

pub async fn init_session(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let session = Session::new();
    state
        .db
        .store_item(session.clone())
        .await
        .map_err(common::error::AppError::from)?;

    Ok((StatusCode::OK, Json(SessionView::from(session))))
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = Session::get_required(&id, &state.db).await?;

    Ok(Json(SessionView::from(session)))
}

#[derive(Debug, Deserialize)]
pub struct PreferencesBody {
    ai_provider: String,
    ai_model: String,
    #[serde(default)]
    embedding_provider: Option<String>,
    #[serde(default)]
    embedding_model: Option<String>,
    #[serde(default)]
    theme: Option<String>,
}

pub async fn update_preferences(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<PreferencesBody>,
) -> Result<impl IntoResponse, ApiError> {
    let preferences = SessionPreferences {
        ai_provider: body.ai_provider,
        ai_model: body.ai_model,
        embedding_provider: body.embedding_provider,
        embedding_model: body.embedding_model,
        theme: body.theme,
    };

    let session = Session::update_preferences(&id, preferences, &state.db).await?;

    Ok(Json(SessionView::from(session)))
}
