use axum::routing::get;
use axum::Router;

use crate::handlers::observations;
use crate::state::AppState;

/// Routes mounted at `/observations`.
///
/// ```text
/// GET  /    -> list_observations
/// POST /    -> record_observation
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/",
        get(observations::list_observations).post(observations::record_observation),
    )
}
