use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    conversations::get_current_conversation,
    health::health,
    query::run_query,
    repositories::{get_file, get_repository, get_tree, ingest_repository},
    sessions::{get_session, init_session, update_preferences},
    tasks::get_task,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for the backend API. Ingestion and query are key-protected
/// outside development; the read-side endpoints are open.
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let open = Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions/init", post(init_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/preferences", patch(update_preferences))
        .route("/api/repositories/{repo_id}", get(get_repository))
        .route("/api/repositories/{repo_id}/tree", get(get_tree))
        .route("/api/repositories/{repo_id}/file", get(get_file))
        .route("/api/tasks/{task_id}", get(get_task))
        .route("/api/conversations/current", get(get_current_conversation));

    let protected = Router::new()
        .route("/api/repositories/", post(ingest_repository))
        .route("/api/query/", post(run_query))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    open.merge(protected)
}
