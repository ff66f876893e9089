//! Exponential moving average of delay.

use busline_core::error::CoreError;
use busline_core::stats::RunningStats;

use super::{require_history, Model, ModelOutput, PredictionContext};

pub const ALGORITHM: &str = "exponential_moving_average";

/// Number of latest delays whose spread drives confidence.
pub const VOLATILITY_WINDOW: usize = 10;
/// Confidence lost per minute of standard deviation in that window.
pub const VOLATILITY_PENALTY: f64 = 10.0;

pub struct ExponentialMovingAverageModel {
    alpha: f64,
    min_observations: usize,
}

impl ExponentialMovingAverageModel {
    /// `alpha` is clamped into `(0, 1]`.
    pub fn new(alpha: f64, min_observations: usize) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            min_observations,
        }
    }
}

/// Seeded with the first value; `None` for an empty input.
pub fn ema(values: impl IntoIterator<Item = f64>, alpha: f64) -> Option<f64> {
    values.into_iter().fold(None, |acc, x| match acc {
        None => Some(x),
        Some(prev) => Some(alpha * x + (1.0 - alpha) * prev),
    })
}

impl Model for ExponentialMovingAverageModel {
    fn id(&self) -> &str {
        ALGORITHM
    }

    fn predict(&self, ctx: &PredictionContext) -> Result<ModelOutput, CoreError> {
        require_history(ALGORITHM, &ctx.history, self.min_observations)?;

        let delays = ctx.history.iter().map(|o| f64::from(o.delay_minutes));
        let value = ema(delays, self.alpha).unwrap_or_default();

        let start = ctx.history.len().saturating_sub(VOLATILITY_WINDOW);
        let spread = RunningStats::from_values(
            ctx.history[start..]
                .iter()
                .map(|o| f64::from(o.delay_minutes)),
        )
        .std_dev();

        Ok(ModelOutput::new(value, 100.0 - VOLATILITY_PENALTY * spread))
    }
}
