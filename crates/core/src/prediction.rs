//! Prediction requests, emitted predictions, and the ledger query filter.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::accuracy::clamp_score;
use crate::error::CoreError;
use crate::target::{Target, TargetKey};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Identifier of the accuracy-weighted meta-model.
pub const ENSEMBLE_ALGORITHM: &str = "ensemble";

/// Horizon used when a request does not specify one.
pub const DEFAULT_HORIZON_MINUTES: u32 = 60;

/// Longest look-ahead accepted (one day).
pub const MAX_HORIZON_MINUTES: u32 = 24 * 60;

// ---------------------------------------------------------------------------
// Prediction type
// ---------------------------------------------------------------------------

/// Category of a prediction. Responses are grouped by this value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    /// Minutes of delay at the stop (signed, negative means early).
    #[default]
    Delay,
}

impl PredictionType {
    pub const ALL: [PredictionType; 1] = [PredictionType::Delay];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delay => "delay",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| CoreError::Validation(format!("Unknown prediction type '{value}'")))
    }
}

impl std::fmt::Display for PredictionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub target: Target,
    /// `None` means the ensemble.
    pub algorithm: Option<String>,
    pub horizon_minutes: u32,
    pub prediction_type: PredictionType,
}

impl PredictionRequest {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            algorithm: None,
            horizon_minutes: DEFAULT_HORIZON_MINUTES,
            prediction_type: PredictionType::Delay,
        }
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn with_horizon(mut self, horizon_minutes: u32) -> Self {
        self.horizon_minutes = horizon_minutes;
        self
    }

    /// The algorithm to run, defaulting to the ensemble.
    pub fn algorithm(&self) -> &str {
        self.algorithm
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(ENSEMBLE_ALGORITHM)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.target.validate()?;
        validate_horizon(self.horizon_minutes)
    }
}

/// Horizon must be a positive number of minutes, at most one day.
pub fn validate_horizon(horizon_minutes: u32) -> Result<(), CoreError> {
    if horizon_minutes == 0 || horizon_minutes > MAX_HORIZON_MINUTES {
        return Err(CoreError::Validation(format!(
            "horizon must be between 1 and {MAX_HORIZON_MINUTES} minutes, got {horizon_minutes}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Emitted predictions
// ---------------------------------------------------------------------------

/// A persisted prediction for one (line, bus, stop) series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: DbId,
    pub bus_id: String,
    pub line_id: String,
    pub stop_id: String,
    /// The algorithm that actually produced the value (after any fallback).
    pub algorithm: String,
    pub prediction_type: PredictionType,
    pub predicted_value: f64,
    pub confidence: f64,
    pub horizon: u32,
    pub generated_at: Timestamp,
    pub target_time: Timestamp,
    pub resolved: bool,
}

impl Prediction {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.line_id, &self.bus_id, &self.stop_id)
    }
}

/// A prediction that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub bus_id: String,
    pub line_id: String,
    pub stop_id: String,
    pub algorithm: String,
    pub prediction_type: PredictionType,
    pub predicted_value: f64,
    pub confidence: f64,
    pub horizon: u32,
    pub generated_at: Timestamp,
    pub target_time: Timestamp,
}

impl NewPrediction {
    /// Build a prediction, clamping confidence and deriving the target time.
    pub fn new(
        key: &TargetKey,
        algorithm: &str,
        prediction_type: PredictionType,
        predicted_value: f64,
        confidence: f64,
        horizon: u32,
        generated_at: Timestamp,
    ) -> Self {
        Self {
            bus_id: key.bus_id.clone(),
            line_id: key.line_id.clone(),
            stop_id: key.stop_id.clone(),
            algorithm: algorithm.to_string(),
            prediction_type,
            predicted_value,
            confidence: clamp_score(confidence),
            horizon,
            generated_at,
            target_time: generated_at + Duration::minutes(i64::from(horizon)),
        }
    }

    pub fn into_prediction(self, id: DbId) -> Prediction {
        Prediction {
            id,
            bus_id: self.bus_id,
            line_id: self.line_id,
            stop_id: self.stop_id,
            algorithm: self.algorithm,
            prediction_type: self.prediction_type,
            predicted_value: self.predicted_value,
            confidence: self.confidence,
            horizon: self.horizon,
            generated_at: self.generated_at,
            target_time: self.target_time,
            resolved: false,
        }
    }
}

/// Predictions produced for one request, grouped by type.
#[derive(Debug, Clone, Default)]
pub struct PredictionBatch {
    pub algorithm: String,
    pub generated_at: Option<Timestamp>,
    pub predictions: BTreeMap<PredictionType, Vec<Prediction>>,
}

impl PredictionBatch {
    pub fn new(algorithm: &str, generated_at: Timestamp, predictions: Vec<Prediction>) -> Self {
        let mut grouped: BTreeMap<PredictionType, Vec<Prediction>> = BTreeMap::new();
        for prediction in predictions {
            grouped
                .entry(prediction.prediction_type)
                .or_default()
                .push(prediction);
        }
        Self {
            algorithm: algorithm.to_string(),
            generated_at: Some(generated_at),
            predictions: grouped,
        }
    }

    pub fn count(&self) -> usize {
        self.predictions.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.values().flatten()
    }
}

// ---------------------------------------------------------------------------
// Ledger queries
// ---------------------------------------------------------------------------

/// Default number of predictions returned by a ledger listing.
pub const DEFAULT_LEDGER_LIMIT: usize = 100;
/// Hard cap on a ledger listing.
pub const MAX_LEDGER_LIMIT: usize = 1000;

/// Clamp a caller-supplied limit into `1..=MAX_LEDGER_LIMIT`.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_LEDGER_LIMIT)
        .clamp(1, MAX_LEDGER_LIMIT)
}

/// Filter for listing the latest persisted predictions.
///
/// Only the newest prediction per (series, algorithm, type, horizon) is
/// returned; older ones are superseded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFilter {
    pub bus_id: Option<String>,
    pub line_id: Option<String>,
    pub algorithm: Option<String>,
    pub prediction_type: Option<PredictionType>,
    pub horizon: Option<u32>,
    pub limit: usize,
}

impl LedgerFilter {
    pub fn matches(&self, prediction: &Prediction) -> bool {
        self.bus_id.as_deref().map_or(true, |b| b == prediction.bus_id)
            && self.line_id.as_deref().map_or(true, |l| l == prediction.line_id)
            && self
                .algorithm
                .as_deref()
                .map_or(true, |a| a == prediction.algorithm)
            && self
                .prediction_type
                .map_or(true, |t| t == prediction.prediction_type)
            && self.horizon.map_or(true, |h| h == prediction.horizon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    #[test]
    fn request_defaults_to_ensemble() {
        let request = PredictionRequest::new(Target::bus("B1"));
        assert_eq!(request.algorithm(), ENSEMBLE_ALGORITHM);
        assert_eq!(request.horizon_minutes, DEFAULT_HORIZON_MINUTES);
        assert_eq!(
            request.with_algorithm("").algorithm(),
            ENSEMBLE_ALGORITHM,
            "empty algorithm falls back to the ensemble"
        );
    }

    #[test]
    fn horizon_bounds() {
        assert_matches!(validate_horizon(0), Err(CoreError::Validation(_)));
        assert!(validate_horizon(1).is_ok());
        assert!(validate_horizon(MAX_HORIZON_MINUTES).is_ok());
        assert_matches!(
            validate_horizon(MAX_HORIZON_MINUTES + 1),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn new_prediction_clamps_confidence_and_sets_target_time() {
        let generated_at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let key = TargetKey::new("L1", "B1", "S1");
        let p = NewPrediction::new(&key, "ensemble", PredictionType::Delay, 3.0, 140.0, 30, generated_at);
        assert_eq!(p.confidence, 100.0);
        assert_eq!(p.target_time, Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap());

        let p = NewPrediction::new(&key, "ensemble", PredictionType::Delay, 3.0, -5.0, 30, generated_at);
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn unknown_prediction_type_is_rejected() {
        assert_eq!(PredictionType::parse("delay").unwrap(), PredictionType::Delay);
        assert_matches!(PredictionType::parse("weather"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_LEDGER_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50_000)), MAX_LEDGER_LIMIT);
    }
}
