use axum::routing::{get, post};
use axum::Router;

use crate::handlers::predictions;
use crate::state::AppState;

/// Routes mounted at `/predictions`.
///
/// ```text
/// GET  /                  -> list_predictions
/// GET  /bus/{bus_id}      -> bus_predictions
/// GET  /alerts            -> predictive_alerts
/// GET  /performance       -> performance
/// POST /generate          -> generate_predictions (bearer token)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(predictions::list_predictions))
        .route("/bus/{bus_id}", get(predictions::bus_predictions))
        .route("/alerts", get(predictions::predictive_alerts))
        .route("/performance", get(predictions::performance))
        .route("/generate", post(predictions::generate_predictions))
}
