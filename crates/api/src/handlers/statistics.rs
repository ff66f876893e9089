//! Handlers for the statistics page: the headline overview, accuracy
//! history, delay and occupancy aggregates.

use axum::extract::State;
use axum::Json;
use busline_core::accuracy::PredictionAccuracy;
use busline_core::reporting::{
    DelayDistribution, LinePerformance, OccupancyTrend, StatisticsOverview,
};
use busline_core::stats::{DelayBucketing, DelayStats};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::query::{ApiQuery, DelayStatsQuery, OccupancyQuery, ScopeQuery};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub overview: StatisticsOverview,
}

#[derive(Debug, Serialize)]
pub struct AccuracyResponse {
    pub accuracy: Vec<PredictionAccuracy>,
}

#[derive(Debug, Serialize)]
pub struct DistributionResponse {
    pub distribution: Vec<DelayDistribution>,
}

#[derive(Debug, Serialize)]
pub struct TrendsResponse {
    pub trends: Vec<OccupancyTrend>,
}

#[derive(Debug, Serialize)]
pub struct LinePerformanceResponse {
    pub performance: Vec<LinePerformance>,
}

#[derive(Debug, Serialize)]
pub struct DelayStatsResponse {
    pub bucketing: DelayBucketing,
    pub buckets: Vec<DelayStats>,
}

fn bucketing_or(value: Option<&str>, default: DelayBucketing) -> AppResult<DelayBucketing> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => DelayBucketing::parse(v).map_err(AppError::from),
        None => Ok(default),
    }
}

/// GET /statistics/overview
pub async fn overview(
    State(state): State<AppState>,
    ApiQuery(scope): ApiQuery<ScopeQuery>,
) -> AppResult<Json<OverviewResponse>> {
    let overview = state.engine.statistics_overview(scope.to_filter()).await?;
    Ok(Json(OverviewResponse { overview }))
}

/// GET /statistics/prediction-accuracy
pub async fn prediction_accuracy(State(state): State<AppState>) -> Json<AccuracyResponse> {
    Json(AccuracyResponse {
        accuracy: state.engine.tracker.daily_accuracy(),
    })
}

/// GET /statistics/delay-distribution
pub async fn delay_distribution(
    State(state): State<AppState>,
    ApiQuery(scope): ApiQuery<ScopeQuery>,
) -> AppResult<Json<DistributionResponse>> {
    let distribution = state
        .engine
        .samples
        .delay_distribution(scope.to_filter())
        .await?;
    Ok(Json(DistributionResponse { distribution }))
}

/// GET /statistics/occupancy-trends
///
/// `period=hour` (default) buckets by hour of day, `period=day` by weekday.
pub async fn occupancy_trends(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<OccupancyQuery>,
) -> AppResult<Json<TrendsResponse>> {
    let bucketing = bucketing_or(params.period.as_deref(), DelayBucketing::HourOfDay)?;
    let trends = state
        .engine
        .samples
        .occupancy_trends(params.scope.to_filter(), bucketing)
        .await?;
    Ok(Json(TrendsResponse { trends }))
}

/// GET /statistics/line-performance
pub async fn line_performance(
    State(state): State<AppState>,
    ApiQuery(scope): ApiQuery<ScopeQuery>,
) -> AppResult<Json<LinePerformanceResponse>> {
    let performance = state
        .engine
        .samples
        .line_performance(scope.to_filter())
        .await?;
    Ok(Json(LinePerformanceResponse { performance }))
}

/// GET /statistics/delay-stats
///
/// Count, mean and variance of delays per bucket. Every bucket is present.
pub async fn delay_stats(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<DelayStatsQuery>,
) -> AppResult<Json<DelayStatsResponse>> {
    let bucketing = bucketing_or(params.bucketing.as_deref(), DelayBucketing::HourOfDay)?;
    let buckets = state
        .engine
        .samples
        .aggregate_delay_stats(params.scope.to_filter(), bucketing)
        .await?;
    Ok(Json(DelayStatsResponse { bucketing, buckets }))
}
