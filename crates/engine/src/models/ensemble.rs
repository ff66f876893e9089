//! Accuracy-weighted ensemble over the base models.
//!
//! Each component that produces a value is weighted by its historical
//! average accuracy. Components without history get [`NEUTRAL_WEIGHT`].
//! Disagreement between components is subtracted from the blended
//! confidence, so the ensemble is never more confident than its most
//! confident member.

use std::sync::Arc;

use busline_core::accuracy::AccuracySnapshot;
use busline_core::error::CoreError;
use busline_core::prediction::ENSEMBLE_ALGORITHM;
use busline_core::stats::RunningStats;

use super::{Model, ModelOutput, PredictionContext};

/// Weight given to a component with no resolved predictions yet.
pub const NEUTRAL_WEIGHT: f64 = 50.0;

/// Confidence lost per minute of standard deviation between component values.
pub const DISAGREEMENT_PENALTY: f64 = 1.0;

pub struct EnsembleModel {
    components: Vec<Arc<dyn Model>>,
}

impl EnsembleModel {
    pub fn new(components: Vec<Arc<dyn Model>>) -> Self {
        Self { components }
    }

    pub fn component_ids(&self) -> Vec<&str> {
        self.components.iter().map(|m| m.id()).collect()
    }
}

/// Blend component outputs using weights from `accuracy`.
///
/// With no outputs the result is [`ModelOutput::empty`].
pub fn combine(outputs: &[(&str, ModelOutput)], accuracy: &AccuracySnapshot) -> ModelOutput {
    if outputs.is_empty() {
        return ModelOutput::empty();
    }

    let any_history = outputs
        .iter()
        .any(|(id, _)| accuracy.get(id).is_some_and(|r| r.has_history()));

    let mut weights: Vec<f64> = outputs
        .iter()
        .map(|(id, _)| {
            if !any_history {
                return 1.0;
            }
            match accuracy.get(id) {
                Some(record) if record.has_history() => record.average_accuracy.max(0.0),
                _ => NEUTRAL_WEIGHT,
            }
        })
        .collect();

    let mut total: f64 = weights.iter().sum();
    if total <= 0.0 {
        weights.iter_mut().for_each(|w| *w = 1.0);
        total = weights.len() as f64;
    }

    let value = outputs
        .iter()
        .zip(&weights)
        .map(|((_, o), w)| o.value * w)
        .sum::<f64>()
        / total;
    let confidence = outputs
        .iter()
        .zip(&weights)
        .map(|((_, o), w)| o.confidence * w)
        .sum::<f64>()
        / total;
    let spread = RunningStats::from_values(outputs.iter().map(|(_, o)| o.value)).std_dev();

    ModelOutput::new(value, (confidence - DISAGREEMENT_PENALTY * spread).max(0.0))
}

impl Model for EnsembleModel {
    fn id(&self) -> &str {
        ENSEMBLE_ALGORITHM
    }

    fn predict(&self, ctx: &PredictionContext) -> Result<ModelOutput, CoreError> {
        let mut outputs = Vec::with_capacity(self.components.len());
        for model in &self.components {
            match model.predict(ctx) {
                Ok(output) => outputs.push((model.id(), output)),
                Err(e) if e.is_model_local() => {
                    tracing::debug!(
                        algorithm = model.id(),
                        target_key = %ctx.key,
                        error = %e,
                        "Component excluded from ensemble"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        algorithm = model.id(),
                        target_key = %ctx.key,
                        error = %e,
                        "Component failed, excluded from ensemble"
                    );
                }
            }
        }
        Ok(combine(&outputs, &ctx.accuracy))
    }
}
