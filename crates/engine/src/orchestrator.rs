//! Prediction Orchestrator: turns a request into persisted predictions.
//!
//! For each concrete series in the request scope the orchestrator loads
//! history, runs the selected model on the blocking pool under a time budget
//! and persists the result before returning it. A model that overruns its
//! budget is replaced by the moving average for that series.

use std::sync::Arc;

use busline_core::accuracy::AccuracySnapshot;
use busline_core::alert::{AlertFilter, PredictiveAlert};
use busline_core::error::CoreError;
use busline_core::observation::ObservationFilter;
use busline_core::prediction::{
    LedgerFilter, NewPrediction, Prediction, PredictionBatch, PredictionRequest, PredictionType,
    ENSEMBLE_ALGORITHM, MAX_LEDGER_LIMIT,
};
use busline_core::store::PredictionLedger;
use busline_core::target::TargetKey;
use busline_core::types::Timestamp;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};

use crate::config::EngineConfig;
use crate::models::{moving_average, Model, ModelOutput, ModelRegistry, PredictionContext};
use crate::sample_store::SampleStore;
use crate::tracker::AccuracyBoard;

/// Model used when the requested one overruns its budget.
pub const FALLBACK_ALGORITHM: &str = moving_average::ALGORITHM;

/// Series predicted concurrently within one request.
const TARGET_CONCURRENCY: usize = 8;

/// Outcome of a batch generation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSummary {
    pub targets: usize,
    pub generated: usize,
    pub skipped: usize,
}

pub struct PredictionOrchestrator {
    samples: Arc<SampleStore>,
    registry: Arc<ModelRegistry>,
    ledger: Arc<dyn PredictionLedger>,
    board: Arc<AccuracyBoard>,
    config: EngineConfig,
}

impl PredictionOrchestrator {
    pub fn new(
        samples: Arc<SampleStore>,
        registry: Arc<ModelRegistry>,
        ledger: Arc<dyn PredictionLedger>,
        board: Arc<AccuracyBoard>,
        config: EngineConfig,
    ) -> Self {
        Self {
            samples,
            registry,
            ledger,
            board,
            config,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Predict for every series in the request scope and persist the results.
    ///
    /// Series that fail with a model-local error are skipped. If every
    /// series fails, the first error is returned.
    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionBatch, CoreError> {
        request.validate()?;
        let algorithm = request.algorithm();
        let model = self.registry.get(algorithm)?;
        let now = Utc::now();

        let mut keys = self.samples.resolve_targets(&request.target).await?;
        if keys.is_empty() {
            match synthetic_key(request) {
                Some(key) if algorithm == ENSEMBLE_ALGORITHM => keys.push(key),
                _ if algorithm == ENSEMBLE_ALGORITHM => {
                    return Ok(PredictionBatch::new(algorithm, now, Vec::new()));
                }
                _ => {
                    return Err(CoreError::InsufficientData {
                        algorithm: algorithm.to_string(),
                        required: self.config.min_observations,
                        actual: 0,
                    });
                }
            }
        }

        let predictions = self
            .predict_keys(&model, keys, request.horizon_minutes, request.prediction_type, now)
            .await?;

        tracing::info!(
            algorithm,
            count = predictions.len(),
            horizon = request.horizon_minutes,
            "Predictions generated"
        );
        Ok(PredictionBatch::new(algorithm, now, predictions))
    }

    /// Run the ensemble for every series seen within the lookback window.
    pub async fn generate_all(&self, horizon_minutes: u32) -> Result<GenerationSummary, CoreError> {
        busline_core::prediction::validate_horizon(horizon_minutes)?;
        let model = self.registry.get(ENSEMBLE_ALGORITHM)?;
        let now = Utc::now();

        let filter = ObservationFilter::default().since(now - self.config.lookback());
        let keys = self.samples.distinct_targets(&filter).await?;
        let targets = keys.len();
        if targets == 0 {
            return Ok(GenerationSummary::default());
        }

        let generated = match self
            .predict_keys(&model, keys, horizon_minutes, PredictionType::Delay, now)
            .await
        {
            Ok(predictions) => predictions.len(),
            Err(e) if e.is_model_local() => 0,
            Err(e) => return Err(e),
        };

        let summary = GenerationSummary {
            targets,
            generated,
            skipped: targets - generated,
        };
        tracing::info!(
            targets = summary.targets,
            generated = summary.generated,
            skipped = summary.skipped,
            "Batch generation pass complete"
        );
        Ok(summary)
    }

    /// Latest persisted predictions.
    pub async fn latest(&self, filter: &LedgerFilter) -> Result<Vec<Prediction>, CoreError> {
        self.ledger.latest(filter).await
    }

    /// Alerts derived from the latest ensemble predictions whose target time
    /// has not passed, most severe first.
    pub async fn predictive_alerts(
        &self,
        filter: &AlertFilter,
    ) -> Result<Vec<PredictiveAlert>, CoreError> {
        let now = Utc::now();
        let latest = self
            .ledger
            .latest(&LedgerFilter {
                line_id: filter.line_id.clone(),
                algorithm: Some(ENSEMBLE_ALGORITHM.to_string()),
                prediction_type: Some(PredictionType::Delay),
                limit: MAX_LEDGER_LIMIT,
                ..Default::default()
            })
            .await?;

        let mut alerts: Vec<PredictiveAlert> = latest
            .iter()
            .filter(|p| p.target_time >= now)
            .filter_map(PredictiveAlert::from_prediction)
            .filter(|a| filter.matches(a))
            .collect();
        alerts.sort_by(|a, b| {
            b.severity.cmp(&a.severity).then(
                b.predicted_delay_minutes
                    .total_cmp(&a.predicted_delay_minutes),
            )
        });
        Ok(alerts)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Predict each key, persist the successes and return them in key order.
    async fn predict_keys(
        &self,
        model: &Arc<dyn Model>,
        keys: Vec<TargetKey>,
        horizon_minutes: u32,
        prediction_type: PredictionType,
        now: Timestamp,
    ) -> Result<Vec<Prediction>, CoreError> {
        let snapshot = Arc::new(self.board.snapshot());
        let target_time = now + Duration::minutes(i64::from(horizon_minutes));

        let results: Vec<Result<NewPrediction, CoreError>> = stream::iter(keys)
            .map(|key| {
                let snapshot = Arc::clone(&snapshot);
                async move {
                    self.run_for_key(model, &key, target_time, horizon_minutes, now, snapshot)
                        .await
                        .map(|(algorithm, output)| {
                            NewPrediction::new(
                                &key,
                                &algorithm,
                                prediction_type,
                                output.value,
                                output.confidence,
                                horizon_minutes,
                                now,
                            )
                        })
                }
            })
            .buffered(TARGET_CONCURRENCY)
            .collect()
            .await;

        let mut successes = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(prediction) => successes.push(prediction),
                Err(e) => {
                    tracing::debug!(algorithm = model.id(), error = %e, "Target skipped");
                    first_error.get_or_insert(e);
                }
            }
        }

        if successes.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        self.ledger.insert(successes).await
    }

    /// Returns the id of the model that produced the output.
    async fn run_for_key(
        &self,
        model: &Arc<dyn Model>,
        key: &TargetKey,
        target_time: Timestamp,
        horizon_minutes: u32,
        now: Timestamp,
        accuracy: Arc<AccuracySnapshot>,
    ) -> Result<(String, ModelOutput), CoreError> {
        let history = self.samples.history(key, now).await?;
        let ctx = Arc::new(PredictionContext {
            key: key.clone(),
            history,
            target_time,
            horizon_minutes,
            accuracy,
        });

        match self.run_with_budget(Arc::clone(model), Arc::clone(&ctx)).await {
            Ok(output) => Ok((model.id().to_string(), output)),
            Err(CoreError::Timeout {
                algorithm,
                budget_ms,
            }) if model.id() != FALLBACK_ALGORITHM => {
                tracing::warn!(
                    algorithm = %algorithm,
                    budget_ms,
                    target_key = %key,
                    fallback = FALLBACK_ALGORITHM,
                    "Model timed out, falling back"
                );
                let fallback = self.registry.get(FALLBACK_ALGORITHM)?;
                let output = self.run_with_budget(Arc::clone(&fallback), ctx).await?;
                Ok((fallback.id().to_string(), output))
            }
            Err(e) => Err(e),
        }
    }

    /// Run `model` on the blocking pool, failing with
    /// [`CoreError::Timeout`] past the configured budget.
    ///
    /// A timed-out computation is abandoned, not cancelled; it finishes on
    /// the blocking pool and its result is discarded.
    async fn run_with_budget(
        &self,
        model: Arc<dyn Model>,
        ctx: Arc<PredictionContext>,
    ) -> Result<ModelOutput, CoreError> {
        let budget = self.config.model_timeout;
        let algorithm = model.id().to_string();
        let task = tokio::task::spawn_blocking(move || model.predict(&ctx));

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CoreError::Internal(format!(
                "model {algorithm} aborted: {join_error}"
            ))),
            Err(_) => Err(CoreError::Timeout {
                algorithm,
                budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

/// Series key for a scope that names a bus and a stop but has no history
/// yet, so the ensemble can still answer with zero confidence.
fn synthetic_key(request: &PredictionRequest) -> Option<TargetKey> {
    let target = &request.target;
    match (&target.bus_id, &target.stop_id) {
        (Some(bus_id), Some(stop_id)) => Some(TargetKey::new(
            target.line_id.as_deref().unwrap_or_default(),
            bus_id,
            stop_id,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OpenCatalog;
    use crate::memory::{MemoryObservationStore, MemoryPredictionLedger};
    use crate::models::ExponentialMovingAverageModel;
    use assert_matches::assert_matches;
    use busline_core::observation::NewObservation;
    use busline_core::store::ObservationStore;
    use busline_core::target::Target;

    struct Fixture {
        store: Arc<MemoryObservationStore>,
        ledger: Arc<MemoryPredictionLedger>,
        orchestrator: PredictionOrchestrator,
    }

    fn fixture_with(registry: ModelRegistry, config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryObservationStore::new());
        let ledger = Arc::new(MemoryPredictionLedger::new());
        let samples = Arc::new(SampleStore::new(store.clone(), Arc::new(OpenCatalog), &config));
        let orchestrator = PredictionOrchestrator::new(
            samples,
            Arc::new(registry),
            ledger.clone(),
            Arc::new(AccuracyBoard::new()),
            config,
        );
        Fixture {
            store,
            ledger,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::default();
        fixture_with(ModelRegistry::standard(&config), config)
    }

    async fn seed(store: &MemoryObservationStore, key: &TargetKey, delays: &[i64]) {
        let now = Utc::now();
        for (i, delay) in delays.iter().enumerate() {
            let arrival = now - Duration::hours(i as i64 + 1);
            store
                .append(NewObservation::new(key, arrival - Duration::minutes(*delay), arrival, None))
                .await
                .unwrap();
        }
    }

    /// Sleeps past any reasonable budget.
    struct SlowModel;

    impl Model for SlowModel {
        fn id(&self) -> &str {
            "slow"
        }

        fn predict(&self, _ctx: &PredictionContext) -> Result<ModelOutput, CoreError> {
            std::thread::sleep(std::time::Duration::from_millis(300));
            Ok(ModelOutput::new(99.0, 99.0))
        }
    }

    #[tokio::test]
    async fn predict_persists_before_returning() {
        let f = fixture();
        let key = TargetKey::new("L1", "B1", "S1");
        seed(&f.store, &key, &[3, 3, 3, 3]).await;

        let request =
            PredictionRequest::new(Target::bus("B1")).with_algorithm("exponential_moving_average");
        let batch = f.orchestrator.predict(&request).await.unwrap();
        assert_eq!(batch.count(), 1);
        let prediction = batch.iter().next().unwrap();
        assert!((prediction.predicted_value - 3.0).abs() < 1e-9);
        assert_eq!(prediction.algorithm, "exponential_moving_average");
        assert!(prediction.id > 0);
        assert_eq!(f.ledger.len(), 1);
    }

    #[tokio::test]
    async fn line_scope_fans_out_and_skips_thin_series() {
        let f = fixture();
        seed(&f.store, &TargetKey::new("L1", "B1", "S1"), &[2, 2, 2]).await;
        seed(&f.store, &TargetKey::new("L1", "B2", "S1"), &[5, 5, 5]).await;
        seed(&f.store, &TargetKey::new("L1", "B3", "S1"), &[1]).await;

        let request =
            PredictionRequest::new(Target::line("L1")).with_algorithm("exponential_moving_average");
        let batch = f.orchestrator.predict(&request).await.unwrap();
        let buses: Vec<_> = batch.iter().map(|p| p.bus_id.as_str()).collect();
        assert_eq!(buses, ["B1", "B2"]);
    }

    #[tokio::test]
    async fn all_targets_failing_surfaces_first_error() {
        let f = fixture();
        seed(&f.store, &TargetKey::new("L1", "B1", "S1"), &[2]).await;

        let request = PredictionRequest::new(Target::bus("B1")).with_algorithm("linear_regression");
        assert_matches!(
            f.orchestrator.predict(&request).await,
            Err(CoreError::InsufficientData { actual: 1, .. })
        );
        assert!(f.ledger.is_empty());
    }

    #[tokio::test]
    async fn unknown_algorithm_and_empty_scope() {
        let f = fixture();
        let request = PredictionRequest::new(Target::bus("B1")).with_algorithm("unknown_model");
        assert_matches!(
            f.orchestrator.predict(&request).await,
            Err(CoreError::UnknownAlgorithm(_))
        );
        let request = PredictionRequest::new(Target::default());
        assert_matches!(
            f.orchestrator.predict(&request).await,
            Err(CoreError::InvalidScope(_))
        );
    }

    #[tokio::test]
    async fn ensemble_without_history_answers_with_zero_confidence() {
        let f = fixture();
        let request = PredictionRequest::new(Target::bus_at_stop("B9", "S9"));
        let batch = f.orchestrator.predict(&request).await.unwrap();
        assert_eq!(batch.count(), 1);
        let prediction = batch.iter().next().unwrap();
        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(prediction.algorithm, ENSEMBLE_ALGORITHM);

        let request = PredictionRequest::new(Target::bus("B9")).with_algorithm("seasonal_analysis");
        assert_matches!(
            f.orchestrator.predict(&request).await,
            Err(CoreError::InsufficientData { actual: 0, .. })
        );
    }

    #[tokio::test]
    async fn timeout_falls_back_to_moving_average() {
        let config = EngineConfig {
            model_timeout: std::time::Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(SlowModel));
        registry.register(Arc::new(ExponentialMovingAverageModel::new(0.3, 3)));
        let f = fixture_with(registry, config);
        seed(&f.store, &TargetKey::new("L1", "B1", "S1"), &[4, 4, 4]).await;

        let request = PredictionRequest::new(Target::bus("B1")).with_algorithm("slow");
        let batch = f.orchestrator.predict(&request).await.unwrap();
        let prediction = batch.iter().next().unwrap();
        assert_eq!(prediction.algorithm, FALLBACK_ALGORITHM);
        assert!((prediction.predicted_value - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn generate_all_covers_every_series() {
        let f = fixture();
        seed(&f.store, &TargetKey::new("L1", "B1", "S1"), &[2, 3, 4]).await;
        seed(&f.store, &TargetKey::new("L2", "B2", "S2"), &[20, 25, 30]).await;

        let summary = f.orchestrator.generate_all(30).await.unwrap();
        assert_eq!(summary.targets, 2);
        assert_eq!(summary.generated, 2);

        let latest = f
            .orchestrator
            .latest(&LedgerFilter {
                algorithm: Some(ENSEMBLE_ALGORITHM.into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn alerts_come_from_large_forecasts() {
        let f = fixture();
        seed(&f.store, &TargetKey::new("L1", "B1", "S1"), &[1, 1, 1]).await;
        seed(&f.store, &TargetKey::new("L2", "B2", "S2"), &[40, 40, 40]).await;
        f.orchestrator.generate_all(30).await.unwrap();

        let alerts = f
            .orchestrator
            .predictive_alerts(&AlertFilter::default())
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].line_id, "L2");
        assert_eq!(
            alerts[0].alert_type,
            busline_core::alert::AlertType::PredictiveCancellation
        );
    }
}
