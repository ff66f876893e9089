pub mod health;
pub mod observations;
pub mod predictions;
pub mod statistics;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /predictions                       live or latest predictions
/// /predictions/bus/{bus_id}          live predictions for one bus
/// /predictions/alerts                predictive delay alerts
/// /predictions/performance           accuracy per algorithm
/// /predictions/generate              batch generation pass (POST, requires auth)
///
/// /statistics/overview               delay, punctuality and accuracy headline
/// /statistics/prediction-accuracy    daily accuracy history
/// /statistics/delay-distribution     delay histogram
/// /statistics/occupancy-trends       average occupancy per hour or weekday
/// /statistics/line-performance       on-time share per line
/// /statistics/delay-stats            bucketed delay moments
///
/// /observations                      record (POST), page through history (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/predictions", predictions::router())
        .nest("/statistics", statistics::router())
        .nest("/observations", observations::router())
}
