use axum::routing::get;
use axum::Router;

use crate::handlers::statistics;
use crate::state::AppState;

/// Routes mounted at `/statistics`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/overview", get(statistics::overview))
        .route("/prediction-accuracy", get(statistics::prediction_accuracy))
        .route("/delay-distribution", get(statistics::delay_distribution))
        .route("/occupancy-trends", get(statistics::occupancy_trends))
        .route("/line-performance", get(statistics::line_performance))
        .route("/delay-stats", get(statistics::delay_stats))
}
