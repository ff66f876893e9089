//! Prediction models and the registry that names them.
//!
//! A model is a pure function of a [`PredictionContext`]; it never touches
//! storage. The orchestrator looks models up by id, so adding one only
//! requires registering it.

pub mod ensemble;
pub mod linear_regression;
pub mod moving_average;
pub mod seasonal;

use std::collections::BTreeMap;
use std::sync::Arc;

use busline_core::accuracy::{clamp_score, AccuracySnapshot};
use busline_core::error::CoreError;
use busline_core::observation::Observation;
use busline_core::prediction::ENSEMBLE_ALGORITHM;
use busline_core::target::TargetKey;
use busline_core::types::Timestamp;

use crate::config::EngineConfig;

pub use ensemble::EnsembleModel;
pub use linear_regression::LinearRegressionModel;
pub use moving_average::ExponentialMovingAverageModel;
pub use seasonal::SeasonalAnalysisModel;

// ---------------------------------------------------------------------------
// Model capability
// ---------------------------------------------------------------------------

/// Everything a model may look at for one target.
#[derive(Debug, Clone)]
pub struct PredictionContext {
    pub key: TargetKey,
    /// Observations of the target series, oldest first.
    pub history: Arc<[Observation]>,
    pub target_time: Timestamp,
    pub horizon_minutes: u32,
    /// Accuracy records as of when the request started.
    pub accuracy: Arc<AccuracySnapshot>,
}

/// A predicted delay in minutes and a confidence in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOutput {
    pub value: f64,
    pub confidence: f64,
}

impl ModelOutput {
    pub fn new(value: f64, confidence: f64) -> Self {
        Self {
            value,
            confidence: clamp_score(confidence),
        }
    }

    /// Returned by the ensemble when no component produced a value.
    pub fn empty() -> Self {
        Self {
            value: 0.0,
            confidence: 0.0,
        }
    }
}

pub trait Model: Send + Sync {
    /// Stable identifier, used in requests and accuracy records.
    fn id(&self) -> &str;

    /// Blocking computation; run it off the async executor.
    fn predict(&self, ctx: &PredictionContext) -> Result<ModelOutput, CoreError>;
}

/// Fail with [`CoreError::InsufficientData`] below `required` observations.
pub fn require_history(
    algorithm: &str,
    history: &[Observation],
    required: usize,
) -> Result<(), CoreError> {
    if history.len() < required {
        return Err(CoreError::InsufficientData {
            algorithm: algorithm.to_string(),
            required,
            actual: history.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Models by id.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `base` models plus an ensemble over all of them.
    pub fn with_ensemble(base: Vec<Arc<dyn Model>>) -> Self {
        let mut registry = Self::new();
        for model in &base {
            registry.register(Arc::clone(model));
        }
        registry.register(Arc::new(EnsembleModel::new(base)));
        registry
    }

    /// The three statistical models and the ensemble.
    pub fn standard(config: &EngineConfig) -> Self {
        Self::with_ensemble(vec![
            Arc::new(LinearRegressionModel::new(
                config.regression_window,
                config.min_observations,
            )),
            Arc::new(ExponentialMovingAverageModel::new(
                config.ema_alpha,
                config.min_observations,
            )),
            Arc::new(SeasonalAnalysisModel::new(config.min_observations)),
        ])
    }

    /// Add or replace a model. Returns the one it replaced.
    pub fn register(&mut self, model: Arc<dyn Model>) -> Option<Arc<dyn Model>> {
        self.models.insert(model.id().to_string(), model)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Model>, CoreError> {
        self.models
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownAlgorithm(id.to_string()))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn has_ensemble(&self) -> bool {
        self.models.contains_key(ENSEMBLE_ALGORITHM)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the model tests.

    use super::*;
    use busline_core::observation::NewObservation;
    use chrono::{Duration, TimeZone, Utc};

    /// Monday 2024-03-04 at `hour:minute` UTC, shifted by `weeks`.
    pub fn monday(weeks: i64, hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap() + Duration::weeks(weeks)
    }

    pub fn observation(id: i64, arrival: Timestamp, delay: i64) -> Observation {
        let key = TargetKey::new("L1", "B1", "S1");
        NewObservation::new(&key, arrival - Duration::minutes(delay), arrival, None)
            .into_observation(id, arrival)
    }

    pub fn context(history: Vec<Observation>, target_time: Timestamp, horizon: u32) -> PredictionContext {
        PredictionContext {
            key: TargetKey::new("L1", "B1", "S1"),
            history: history.into(),
            target_time,
            horizon_minutes: horizon,
            accuracy: Arc::new(AccuracySnapshot::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn standard_registry_has_all_models() {
        let registry = ModelRegistry::standard(&EngineConfig::default());
        assert_eq!(
            registry.ids(),
            vec![
                "ensemble",
                "exponential_moving_average",
                "linear_regression",
                "seasonal_analysis"
            ]
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        let registry = ModelRegistry::standard(&EngineConfig::default());
        assert_matches!(
            registry.get("unknown_model").err(),
            Some(CoreError::UnknownAlgorithm(id)) if id == "unknown_model"
        );
    }

    #[test]
    fn zero_history_is_insufficient_for_every_base_model() {
        let registry = ModelRegistry::standard(&EngineConfig::default());
        let ctx = testing::context(Vec::new(), testing::monday(0, 9, 0), 60);
        for id in ["linear_regression", "exponential_moving_average", "seasonal_analysis"] {
            let model = registry.get(id).unwrap();
            assert_matches!(
                model.predict(&ctx),
                Err(CoreError::InsufficientData { actual: 0, .. })
            );
        }
        let ensemble = registry.get("ensemble").unwrap();
        assert_eq!(ensemble.predict(&ctx).unwrap(), ModelOutput::empty());
    }
}
