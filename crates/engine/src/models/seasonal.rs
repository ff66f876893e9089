//! Seasonal mean of delay by weekday and hour.
//!
//! Predicts the mean delay of past arrivals in the same (weekday, hour) slot
//! as the target time. A thin slot falls back to the same hour on any day,
//! at reduced confidence.

use busline_core::error::CoreError;
use busline_core::stats::{DelayBucketing, RunningStats};

use super::{require_history, Model, ModelOutput, PredictionContext};

pub const ALGORITHM: &str = "seasonal_analysis";

/// Confidence gained per sample in the bucket, capped at 100.
pub const CONFIDENCE_PER_SAMPLE: f64 = 10.0;
/// Multiplier applied when falling back to the hour-of-day bucket.
pub const HOUR_ONLY_FACTOR: f64 = 0.8;

pub struct SeasonalAnalysisModel {
    min_observations: usize,
}

impl SeasonalAnalysisModel {
    pub fn new(min_observations: usize) -> Self {
        Self { min_observations }
    }

    fn bucket_stats(ctx: &PredictionContext, bucketing: DelayBucketing) -> RunningStats {
        let target = bucketing.bucket_of(ctx.target_time);
        RunningStats::from_values(
            ctx.history
                .iter()
                .filter(|o| bucketing.bucket_of(o.actual_arrival_time) == target)
                .map(|o| f64::from(o.delay_minutes)),
        )
    }
}

fn sample_confidence(count: u64) -> f64 {
    (CONFIDENCE_PER_SAMPLE * count as f64).min(100.0)
}

impl Model for SeasonalAnalysisModel {
    fn id(&self) -> &str {
        ALGORITHM
    }

    fn predict(&self, ctx: &PredictionContext) -> Result<ModelOutput, CoreError> {
        require_history(ALGORITHM, &ctx.history, self.min_observations)?;
        let required = self.min_observations as u64;

        let slot = Self::bucket_stats(ctx, DelayBucketing::DayOfWeekHour);
        if slot.count() >= required {
            return Ok(ModelOutput::new(slot.mean(), sample_confidence(slot.count())));
        }

        let hour = Self::bucket_stats(ctx, DelayBucketing::HourOfDay);
        if hour.count() >= required {
            tracing::trace!(
                target_key = %ctx.key,
                slot_samples = slot.count(),
                hour_samples = hour.count(),
                "Seasonal slot too thin, using hour of day"
            );
            return Ok(ModelOutput::new(
                hour.mean(),
                sample_confidence(hour.count()) * HOUR_ONLY_FACTOR,
            ));
        }

        Err(CoreError::InsufficientData {
            algorithm: ALGORITHM.to_string(),
            required: self.min_observations,
            actual: hour.count() as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{context, monday, observation};
    use assert_matches::assert_matches;

    #[test]
    fn same_slot_mean_and_confidence() {
        let history = [2, 3, 2, 4, 3]
            .into_iter()
            .enumerate()
            .map(|(week, d)| observation(week as i64, monday(week as i64 - 5, 8, 10), d))
            .collect();
        let model = SeasonalAnalysisModel::new(3);
        let out = model.predict(&context(history, monday(0, 8, 40), 30)).unwrap();
        assert!((out.value - 2.8).abs() < 1e-9);
        assert!((out.confidence - 50.0).abs() < 1e-9);
    }

    #[test]
    fn thin_slot_falls_back_to_hour_of_day() {
        // Same hour, different weekdays: the Monday slot has a single sample.
        let history = (0..4)
            .map(|day| observation(day, monday(0, 8, 5) - chrono::Duration::days(day), 6))
            .collect();
        let model = SeasonalAnalysisModel::new(3);
        let out = model.predict(&context(history, monday(0, 8, 30), 30)).unwrap();
        assert!((out.value - 6.0).abs() < 1e-9);
        assert!((out.confidence - 40.0 * HOUR_ONLY_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn no_matching_hour_is_insufficient() {
        let history = (0..5).map(|i| observation(i, monday(0, 6, i as u32), 1)).collect();
        let model = SeasonalAnalysisModel::new(3);
        assert_matches!(
            model.predict(&context(history, monday(0, 18, 0), 30)),
            Err(CoreError::InsufficientData { actual: 0, .. })
        );
    }
}
