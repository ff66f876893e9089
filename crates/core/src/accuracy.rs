//! Accuracy scoring for resolved predictions.
//!
//! A prediction is scored once, when an observation for the same series
//! arrives near its target time. Scores feed a per-algorithm running mean
//! ([`AccuracyRecord`]) which the ensemble uses as weights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound of every score (accuracy, confidence).
pub const MAX_SCORE: f64 = 100.0;

/// Accuracy points lost per minute of absolute error.
///
/// At 10.0 a 10-minute miss scores 0. Any positive value keeps accuracy
/// monotonically non-increasing in the error.
pub const ACCURACY_SCALE_FACTOR: f64 = 10.0;

// ---------------------------------------------------------------------------
// Scoring helpers
// ---------------------------------------------------------------------------

/// Clamp a score into `[0, 100]`. NaN maps to 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, MAX_SCORE)
}

/// Absolute error between a predicted and an observed delay, in minutes.
pub fn prediction_error(predicted_minutes: f64, observed_minutes: i32) -> f64 {
    (predicted_minutes - f64::from(observed_minutes)).abs()
}

/// `max(0, 100 - error * ACCURACY_SCALE_FACTOR)`.
pub fn accuracy_for_error(error_minutes: f64) -> f64 {
    clamp_score(MAX_SCORE - error_minutes.abs() * ACCURACY_SCALE_FACTOR)
}

/// Compute the incremental (online) mean after observing a new value.
///
/// Formula: `new_avg = old_avg + (new_value - old_avg) / new_count`
pub fn incremental_mean(old_avg: f64, new_value: f64, new_count: u64) -> f64 {
    if new_count == 0 {
        return old_avg;
    }
    old_avg + (new_value - old_avg) / new_count as f64
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Rolling accuracy statistics for one algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyRecord {
    pub algorithm: String,
    pub average_accuracy: f64,
    pub average_confidence: f64,
    pub count: u64,
}

impl AccuracyRecord {
    pub fn new(algorithm: &str) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            average_accuracy: 0.0,
            average_confidence: 0.0,
            count: 0,
        }
    }

    /// Fold one resolved prediction into the running means.
    pub fn absorb(&mut self, accuracy: f64, confidence: f64) {
        let new_count = self.count + 1;
        self.average_accuracy =
            clamp_score(incremental_mean(self.average_accuracy, clamp_score(accuracy), new_count));
        self.average_confidence = clamp_score(incremental_mean(
            self.average_confidence,
            clamp_score(confidence),
            new_count,
        ));
        self.count = new_count;
    }

    pub fn has_history(&self) -> bool {
        self.count > 0
    }
}

/// Point-in-time copy of every algorithm's record.
///
/// The ensemble reads weights from a snapshot rather than from the live
/// tracker, so a prediction may use slightly stale weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccuracySnapshot {
    records: BTreeMap<String, AccuracyRecord>,
}

impl AccuracySnapshot {
    pub fn from_records(records: impl IntoIterator<Item = AccuracyRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.algorithm.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, algorithm: &str) -> Option<&AccuracyRecord> {
        self.records.get(algorithm)
    }

    /// Records sorted by algorithm id.
    pub fn records(&self) -> impl Iterator<Item = &AccuracyRecord> {
        self.records.values()
    }

    pub fn is_empty(&self) -> bool {
        self.records.values().all(|r| !r.has_history())
    }
}

/// One day of accuracy history as charted by the statistics page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionAccuracy {
    /// `YYYY-MM-DD` (UTC).
    pub date: String,
    /// Mean accuracy of predictions resolved that day.
    pub accuracy: f64,
    /// Running mean of all resolutions up to and including that day.
    pub average_accuracy: f64,
    pub count: u64,
}
