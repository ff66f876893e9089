//! Accuracy Tracker: resolves predictions against arrivals and keeps the
//! per-algorithm accuracy table.
//!
//! The table ([`AccuracyBoard`]) is owned explicitly and shared by handle.
//! Each algorithm's record sits behind its own mutex so resolutions for
//! different algorithms never contend. Readers get cloned snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use busline_core::accuracy::{
    accuracy_for_error, prediction_error, AccuracyRecord, AccuracySnapshot, PredictionAccuracy,
};
use busline_core::error::CoreError;
use busline_core::observation::Observation;
use busline_core::stats::RunningStats;
use busline_core::store::PredictionLedger;
use busline_core::types::{DbId, Timestamp};
use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// Accuracy table
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct AccuracyBoard {
    records: RwLock<HashMap<String, Arc<Mutex<AccuracyRecord>>>>,
    daily: Mutex<BTreeMap<NaiveDate, RunningStats>>,
    last_updated: Mutex<Option<Timestamp>>,
}

impl AccuracyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create empty records so reports list every registered algorithm.
    pub fn with_algorithms<'a>(algorithms: impl IntoIterator<Item = &'a str>) -> Self {
        let board = Self::new();
        {
            let mut records = board.records.write();
            for algorithm in algorithms {
                records
                    .entry(algorithm.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(AccuracyRecord::new(algorithm))));
            }
        }
        board
    }

    fn slot(&self, algorithm: &str) -> Arc<Mutex<AccuracyRecord>> {
        if let Some(slot) = self.records.read().get(algorithm) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.records
                .write()
                .entry(algorithm.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(AccuracyRecord::new(algorithm)))),
        )
    }

    /// Fold one resolution into `algorithm`'s record and the daily rollup.
    /// Returns the updated record.
    pub fn record(
        &self,
        algorithm: &str,
        accuracy: f64,
        confidence: f64,
        resolved_at: Timestamp,
    ) -> AccuracyRecord {
        let updated = {
            let slot = self.slot(algorithm);
            let mut record = slot.lock();
            record.absorb(accuracy, confidence);
            record.clone()
        };

        self.daily
            .lock()
            .entry(resolved_at.date_naive())
            .or_default()
            .push(accuracy);
        *self.last_updated.lock() = Some(Utc::now());
        updated
    }

    /// All records, sorted by algorithm.
    pub fn report(&self) -> Vec<AccuracyRecord> {
        let slots: Vec<Arc<Mutex<AccuracyRecord>>> =
            self.records.read().values().cloned().collect();
        let mut out: Vec<AccuracyRecord> = slots.iter().map(|s| s.lock().clone()).collect();
        out.sort_by(|a, b| a.algorithm.cmp(&b.algorithm));
        out
    }

    pub fn snapshot(&self) -> AccuracySnapshot {
        AccuracySnapshot::from_records(self.report())
    }

    /// Per-day mean accuracy with a cumulative running mean, oldest first.
    pub fn daily_accuracy(&self) -> Vec<PredictionAccuracy> {
        let daily = self.daily.lock();
        let mut cumulative_sum = 0.0;
        let mut cumulative_count = 0u64;
        daily
            .iter()
            .map(|(date, stats)| {
                cumulative_sum += stats.mean() * stats.count() as f64;
                cumulative_count += stats.count();
                PredictionAccuracy {
                    date: date.format("%Y-%m-%d").to_string(),
                    accuracy: stats.mean(),
                    average_accuracy: if cumulative_count == 0 {
                        0.0
                    } else {
                        cumulative_sum / cumulative_count as f64
                    },
                    count: stats.count(),
                }
            })
            .collect()
    }

    pub fn last_updated(&self) -> Option<Timestamp> {
        *self.last_updated.lock()
    }

    /// Mean accuracy over every resolved prediction of every algorithm,
    /// or 0 before the first resolution.
    pub fn overall_accuracy(&self) -> f64 {
        let (sum, count) = self
            .report()
            .iter()
            .fold((0.0, 0u64), |(sum, count), r| {
                (sum + r.average_accuracy * r.count as f64, count + r.count)
            });
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// One prediction scored against an arrival.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPrediction {
    pub prediction_id: DbId,
    pub algorithm: String,
    pub predicted_value: f64,
    pub observed_delay: i32,
    pub error: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionSummary {
    pub resolved: Vec<ResolvedPrediction>,
    /// Predictions that matched but could not be resolved.
    pub failed: usize,
}

pub struct AccuracyTracker {
    ledger: Arc<dyn PredictionLedger>,
    board: Arc<AccuracyBoard>,
    tolerance: chrono::Duration,
    retention: chrono::Duration,
}

impl AccuracyTracker {
    pub fn new(
        ledger: Arc<dyn PredictionLedger>,
        board: Arc<AccuracyBoard>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ledger,
            board,
            tolerance: config.resolution_tolerance(),
            retention: config.retention(),
        }
    }

    pub fn board(&self) -> &Arc<AccuracyBoard> {
        &self.board
    }

    /// Score every outstanding prediction this arrival resolves.
    ///
    /// Never fails: lookup errors and per-prediction errors are logged and
    /// reflected in [`ResolutionSummary::failed`].
    pub async fn on_observation(&self, observation: &Observation) -> ResolutionSummary {
        let mut summary = ResolutionSummary::default();

        let candidates = match self.ledger.find_resolvable(observation, self.tolerance).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(
                    observation_id = observation.id,
                    error = %e,
                    "Failed to look up resolvable predictions"
                );
                return summary;
            }
        };

        for prediction in candidates {
            if prediction.generated_at > observation.actual_arrival_time {
                continue;
            }
            match self.ledger.mark_resolved(prediction.id).await {
                Ok(true) => {
                    let error = prediction_error(prediction.predicted_value, observation.delay_minutes);
                    let accuracy = accuracy_for_error(error);
                    let record = self.board.record(
                        &prediction.algorithm,
                        accuracy,
                        prediction.confidence,
                        observation.actual_arrival_time,
                    );
                    tracing::debug!(
                        prediction_id = prediction.id,
                        algorithm = %prediction.algorithm,
                        error,
                        accuracy,
                        count = record.count,
                        "Prediction resolved"
                    );
                    summary.resolved.push(ResolvedPrediction {
                        prediction_id: prediction.id,
                        algorithm: prediction.algorithm,
                        predicted_value: prediction.predicted_value,
                        observed_delay: observation.delay_minutes,
                        error,
                        accuracy,
                    });
                }
                // Another resolver got there first.
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        prediction_id = prediction.id,
                        error = %e,
                        "Failed to resolve prediction, skipping"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    pub fn report(&self) -> Vec<AccuracyRecord> {
        self.board.report()
    }

    pub fn daily_accuracy(&self) -> Vec<PredictionAccuracy> {
        self.board.daily_accuracy()
    }

    /// Drop unresolved predictions whose target time is older than the
    /// retention window.
    pub async fn purge_expired(&self, now: Timestamp) -> Result<u64, CoreError> {
        let purged = self.ledger.purge_unresolved_before(now - self.retention).await?;
        if purged > 0 {
            tracing::info!(purged, "Expired unresolved predictions purged");
        }
        Ok(purged)
    }
}
