//! Ordinary least squares of delay against time of day.
//!
//! Fits `delay = intercept + slope * minute_of_day` over the most recent
//! observations and evaluates the line at the target's minute of day.

use busline_core::error::CoreError;
use busline_core::types::Timestamp;
use chrono::Timelike;

use super::{require_history, Model, ModelOutput, PredictionContext};

pub const ALGORITHM: &str = "linear_regression";

/// Confidence lost per minute of residual standard deviation.
pub const RESIDUAL_PENALTY: f64 = 8.0;
/// Confidence lost per minute of horizon.
pub const HORIZON_PENALTY: f64 = 0.25;

/// Below this spread in x the slope is treated as zero.
const MIN_X_VARIANCE: f64 = 1e-9;

pub struct LinearRegressionModel {
    window: usize,
    min_observations: usize,
}

impl LinearRegressionModel {
    pub fn new(window: usize, min_observations: usize) -> Self {
        Self {
            window: window.max(2),
            min_observations,
        }
    }
}

/// Fitted line plus the population standard deviation of its residuals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fit {
    pub intercept: f64,
    pub slope: f64,
    pub residual_std: f64,
}

impl Fit {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// OLS over `(x, y)` pairs. A degenerate x spread yields a flat line at the
/// mean of y. Returns `None` for an empty input.
pub fn fit(points: &[(f64, f64)]) -> Option<Fit> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    let slope = if sxx / n < MIN_X_VARIANCE { 0.0 } else { sxy / sxx };
    let intercept = mean_y - slope * mean_x;

    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();

    Some(Fit {
        intercept,
        slope,
        residual_std: (ss_res / n).sqrt(),
    })
}

fn minute_of_day(at: Timestamp) -> f64 {
    f64::from(at.hour() * 60 + at.minute()) + f64::from(at.second()) / 60.0
}

impl Model for LinearRegressionModel {
    fn id(&self) -> &str {
        ALGORITHM
    }

    fn predict(&self, ctx: &PredictionContext) -> Result<ModelOutput, CoreError> {
        require_history(ALGORITHM, &ctx.history, self.min_observations)?;

        let start = ctx.history.len().saturating_sub(self.window);
        let points: Vec<(f64, f64)> = ctx.history[start..]
            .iter()
            .map(|o| (minute_of_day(o.actual_arrival_time), f64::from(o.delay_minutes)))
            .collect();

        let line = fit(&points).ok_or_else(|| CoreError::InsufficientData {
            algorithm: ALGORITHM.to_string(),
            required: self.min_observations,
            actual: 0,
        })?;

        let confidence = 100.0
            - RESIDUAL_PENALTY * line.residual_std
            - HORIZON_PENALTY * f64::from(ctx.horizon_minutes);
        Ok(ModelOutput::new(line.at(minute_of_day(ctx.target_time)), confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{context, monday, observation};

    #[test]
    fn fit_recovers_exact_line() {
        let line = fit(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]).unwrap();
        assert!((line.slope - 2.0).abs() < 1e-9);
        assert!((line.intercept - 1.0).abs() < 1e-9);
        assert!(line.residual_std < 1e-9);
    }

    #[test]
    fn fit_with_constant_x_is_flat_mean() {
        let line = fit(&[(5.0, 2.0), (5.0, 4.0)]).unwrap();
        assert_eq!(line.slope, 0.0);
        assert!((line.at(100.0) - 3.0).abs() < 1e-9);
        assert!((line.residual_std - 1.0).abs() < 1e-9);
    }

    #[test]
    fn extrapolates_trend_through_the_morning() {
        // One extra minute of delay per ten minutes of clock time.
        let history = vec![
            observation(1, monday(0, 8, 0), 2),
            observation(2, monday(0, 8, 10), 3),
            observation(3, monday(0, 8, 20), 4),
            observation(4, monday(0, 8, 30), 5),
        ];
        let model = LinearRegressionModel::new(20, 3);
        let out = model.predict(&context(history, monday(0, 8, 40), 20)).unwrap();
        assert!((out.value - 6.0).abs() < 1e-9);
        assert!((out.confidence - 95.0).abs() < 1e-9);
    }

    #[test]
    fn uses_only_recent_window() {
        let mut history: Vec<_> = (0..10)
            .map(|i| observation(i, monday(0, 6, i as u32), 30))
            .collect();
        history.extend((10..13).map(|i| observation(i, monday(0, 7, i as u32), 1)));
        let model = LinearRegressionModel::new(3, 3);
        let out = model.predict(&context(history, monday(0, 7, 20), 10)).unwrap();
        assert!((out.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn noisy_history_lowers_confidence() {
        let steady: Vec<_> = (0..6)
            .map(|i| observation(i, monday(0, 8, i as u32 * 5), 3))
            .collect();
        let noisy: Vec<_> = (0..6)
            .map(|i| observation(i, monday(0, 8, i as u32 * 5), if i % 2 == 0 { 0 } else { 8 }))
            .collect();
        let model = LinearRegressionModel::new(20, 3);
        let a = model.predict(&context(steady, monday(0, 9, 0), 30)).unwrap();
        let b = model.predict(&context(noisy, monday(0, 9, 0), 30)).unwrap();
        assert!(a.confidence > b.confidence);
    }
}
