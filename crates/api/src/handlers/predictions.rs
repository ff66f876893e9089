//! Handlers for delay predictions, predictive alerts and model performance.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use busline_core::accuracy::AccuracyRecord;
use busline_core::alert::{AlertFilter, AlertSeverity, PredictiveAlert};
use busline_core::prediction::{
    clamp_limit, validate_horizon, LedgerFilter, Prediction, PredictionBatch, PredictionRequest,
    PredictionType, DEFAULT_HORIZON_MINUTES,
};
use busline_core::target::Target;
use busline_core::types::Timestamp;
use chrono::Utc;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::{AlertsQuery, ApiQuery, BusPredictionsQuery, PredictionsQuery};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Predictions keyed by prediction type (`"delay"`).
pub type GroupedPredictions = BTreeMap<&'static str, Vec<Prediction>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionsResponse {
    pub predictions: GroupedPredictions,
    pub count: usize,
    pub algorithm: String,
    pub generated_at: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusPredictionsResponse {
    pub bus_id: String,
    pub algorithm: String,
    pub predictions: GroupedPredictions,
    pub total_predictions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsResponse {
    pub alerts: Vec<PredictiveAlert>,
    pub count: usize,
    pub generated_at: Timestamp,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceResponse {
    pub performance: BTreeMap<String, AccuracyRecord>,
    pub last_updated: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub message: String,
    pub timestamp: Timestamp,
}

fn group(batch: PredictionBatch) -> GroupedPredictions {
    batch
        .predictions
        .into_iter()
        .map(|(prediction_type, list)| (prediction_type.as_str(), list))
        .collect()
}

fn parse_type(value: Option<&str>) -> AppResult<Option<PredictionType>> {
    Ok(value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PredictionType::parse)
        .transpose()?)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /predictions
///
/// With a bus, line or stop in the query the engine predicts live for that
/// scope. Without one, the latest persisted predictions are listed.
pub async fn list_predictions(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<PredictionsQuery>,
) -> AppResult<Json<PredictionsResponse>> {
    let orchestrator = &state.engine.orchestrator;
    let prediction_type = parse_type(params.prediction_type.as_deref())?;
    let target = Target::new(params.bus_id, params.line_id, params.stop_id);

    if target.is_empty() {
        let request = PredictionRequest::new(target);
        let request = match params.algorithm {
            Some(algorithm) => request.with_algorithm(algorithm),
            None => request,
        };
        let algorithm = request.algorithm().to_string();
        orchestrator.registry().get(&algorithm)?;
        if let Some(horizon) = params.horizon {
            validate_horizon(horizon)?;
        }

        let latest = orchestrator
            .latest(&LedgerFilter {
                algorithm: Some(algorithm.clone()),
                prediction_type,
                horizon: params.horizon,
                limit: clamp_limit(params.limit),
                ..Default::default()
            })
            .await?;
        let generated_at = latest.iter().map(|p| p.generated_at).max();
        let batch = PredictionBatch::new(&algorithm, Utc::now(), latest);

        return Ok(Json(PredictionsResponse {
            count: batch.count(),
            predictions: group(batch),
            algorithm,
            generated_at,
        }));
    }

    let mut request = PredictionRequest::new(target)
        .with_horizon(params.horizon.unwrap_or(DEFAULT_HORIZON_MINUTES));
    if let Some(algorithm) = params.algorithm {
        request = request.with_algorithm(algorithm);
    }
    if let Some(prediction_type) = prediction_type {
        request.prediction_type = prediction_type;
    }

    let mut batch = orchestrator.predict(&request).await?;
    if let Some(prediction_type) = prediction_type {
        batch.predictions.retain(|t, _| *t == prediction_type);
    }

    Ok(Json(PredictionsResponse {
        count: batch.count(),
        algorithm: batch.algorithm.clone(),
        generated_at: batch.generated_at,
        predictions: group(batch),
    }))
}

/// GET /predictions/bus/{bus_id}
pub async fn bus_predictions(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
    ApiQuery(params): ApiQuery<BusPredictionsQuery>,
) -> AppResult<Json<BusPredictionsResponse>> {
    let target = Target::new(Some(bus_id.clone()), None, params.stop_id);
    let mut request = PredictionRequest::new(target)
        .with_horizon(params.horizon.unwrap_or(DEFAULT_HORIZON_MINUTES));
    if let Some(algorithm) = params.algorithm {
        request = request.with_algorithm(algorithm);
    }

    let batch = state.engine.orchestrator.predict(&request).await?;

    Ok(Json(BusPredictionsResponse {
        bus_id,
        algorithm: batch.algorithm.clone(),
        total_predictions: batch.count(),
        predictions: group(batch),
    }))
}

/// GET /predictions/alerts
pub async fn predictive_alerts(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<AlertsQuery>,
) -> AppResult<Json<AlertsResponse>> {
    let severity = params
        .severity
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(AlertSeverity::parse)
        .transpose()?;
    let filter = AlertFilter {
        severity,
        line_id: params.line.filter(|l| !l.trim().is_empty()),
    };

    let alerts = state.engine.orchestrator.predictive_alerts(&filter).await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
        generated_at: Utc::now(),
    }))
}

/// GET /predictions/performance
///
/// Accuracy record per registered algorithm, including ones that have not
/// resolved any prediction yet.
pub async fn performance(State(state): State<AppState>) -> AppResult<Json<PerformanceResponse>> {
    let tracker = &state.engine.tracker;
    let performance = tracker
        .report()
        .into_iter()
        .map(|record| (record.algorithm.clone(), record))
        .collect();

    Ok(Json(PerformanceResponse {
        performance,
        last_updated: tracker.board().last_updated(),
    }))
}

/// POST /predictions/generate
///
/// Run a fresh ensemble pass over every series with recent history.
pub async fn generate_predictions(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<GenerateResponse>> {
    let horizon = state.engine.config().generate_horizon_minutes;
    tracing::info!(user_id = %user.user_id, horizon, "Prediction generation requested");

    let summary = state.engine.orchestrator.generate_all(horizon).await?;

    Ok(Json(GenerateResponse {
        message: format!(
            "Generated {} predictions for {} targets ({} skipped)",
            summary.generated, summary.targets, summary.skipped
        ),
        timestamp: Utc::now(),
    }))
}
