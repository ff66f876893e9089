//! Delay statistics: running moments and time-bucketed aggregation.
//!
//! Buckets are computed in UTC.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::observation::Observation;
use crate::types::Timestamp;

const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

// ---------------------------------------------------------------------------
// Running moments
// ---------------------------------------------------------------------------

/// Welford accumulator for count, mean and population variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        for v in values {
            stats.push(v);
        }
        stats
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean, or 0 when empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance, or 0 with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

// ---------------------------------------------------------------------------
// Bucketing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayBucketing {
    /// 24 buckets, `00:00` .. `23:00`.
    HourOfDay,
    /// 7 buckets, Monday first.
    DayOfWeek,
    /// 168 buckets, one per weekday hour.
    DayOfWeekHour,
}

impl DelayBucketing {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "hour" | "hour_of_day" => Ok(Self::HourOfDay),
            "day" | "day_of_week" => Ok(Self::DayOfWeek),
            "day_hour" | "day_of_week_hour" => Ok(Self::DayOfWeekHour),
            other => Err(CoreError::Validation(format!(
                "Unknown bucketing '{other}'. Expected one of: hour, day, day_hour"
            ))),
        }
    }

    pub fn bucket_count(self) -> usize {
        match self {
            Self::HourOfDay => 24,
            Self::DayOfWeek => 7,
            Self::DayOfWeekHour => 7 * 24,
        }
    }

    pub fn bucket_of(self, at: Timestamp) -> usize {
        let hour = at.hour() as usize;
        let weekday = at.weekday().num_days_from_monday() as usize;
        match self {
            Self::HourOfDay => hour,
            Self::DayOfWeek => weekday,
            Self::DayOfWeekHour => weekday * 24 + hour,
        }
    }

    pub fn label(self, bucket: usize) -> String {
        match self {
            Self::HourOfDay => format!("{bucket:02}:00"),
            Self::DayOfWeek => WEEKDAY_LABELS[bucket % 7].to_string(),
            Self::DayOfWeekHour => {
                format!("{} {:02}:00", WEEKDAY_LABELS[(bucket / 24) % 7], bucket % 24)
            }
        }
    }
}

/// Delay moments for one bucket. Empty buckets report `count = 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayStats {
    pub bucket: usize,
    pub label: String,
    pub count: u64,
    pub mean: f64,
    pub variance: f64,
}

/// Streaming aggregation of observation delays into buckets keyed on the
/// actual arrival time.
#[derive(Debug, Clone)]
pub struct DelayAggregator {
    bucketing: DelayBucketing,
    buckets: Vec<RunningStats>,
}

impl DelayAggregator {
    pub fn new(bucketing: DelayBucketing) -> Self {
        Self {
            bucketing,
            buckets: vec![RunningStats::default(); bucketing.bucket_count()],
        }
    }

    pub fn push(&mut self, observation: &Observation) {
        let bucket = self.bucketing.bucket_of(observation.actual_arrival_time);
        self.buckets[bucket].push(f64::from(observation.delay_minutes));
    }

    pub fn finish(self) -> Vec<DelayStats> {
        let bucketing = self.bucketing;
        self.buckets
            .into_iter()
            .enumerate()
            .map(|(bucket, stats)| DelayStats {
                bucket,
                label: bucketing.label(bucket),
                count: stats.count(),
                mean: stats.mean(),
                variance: stats.variance(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::NewObservation;
    use crate::target::TargetKey;
    use chrono::{Duration, TimeZone, Utc};

    fn observation(at: Timestamp, delay: i64) -> Observation {
        let key = TargetKey::new("L1", "B1", "S1");
        NewObservation::new(&key, at - Duration::minutes(delay), at, None).into_observation(1, at)
    }

    #[test]
    fn running_stats_moments() {
        let stats = RunningStats::from_values([2.0, 3.0, 2.0, 4.0, 3.0]);
        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 2.8).abs() < 1e-9);
        assert!((stats.variance() - 0.56).abs() < 1e-9);
    }

    #[test]
    fn running_stats_empty_and_single() {
        assert_eq!(RunningStats::default().mean(), 0.0);
        assert_eq!(RunningStats::from_values([7.0]).variance(), 0.0);
    }

    #[test]
    fn bucket_of_uses_weekday_and_hour() {
        // 2024-03-04 is a Monday.
        let monday_8 = Utc.with_ymd_and_hms(2024, 3, 4, 8, 15, 0).unwrap();
        let sunday_23 = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 0).unwrap();
        assert_eq!(DelayBucketing::HourOfDay.bucket_of(monday_8), 8);
        assert_eq!(DelayBucketing::DayOfWeek.bucket_of(monday_8), 0);
        assert_eq!(DelayBucketing::DayOfWeekHour.bucket_of(monday_8), 8);
        assert_eq!(DelayBucketing::DayOfWeekHour.bucket_of(sunday_23), 167);
        assert_eq!(DelayBucketing::DayOfWeekHour.label(167), "Sun 23:00");
    }

    #[test]
    fn aggregator_reports_empty_buckets_with_zero_count() {
        let mut agg = DelayAggregator::new(DelayBucketing::HourOfDay);
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        agg.push(&observation(at, 2));
        agg.push(&observation(at, 4));

        let stats = agg.finish();
        assert_eq!(stats.len(), 24);
        assert_eq!(stats[8].count, 2);
        assert!((stats[8].mean - 3.0).abs() < 1e-9);
        assert_eq!(stats[8].label, "08:00");
        assert!(stats.iter().filter(|s| s.bucket != 8).all(|s| s.count == 0));
    }

    #[test]
    fn bucketing_parse() {
        assert_eq!(DelayBucketing::parse("hour").unwrap(), DelayBucketing::HourOfDay);
        assert_eq!(DelayBucketing::parse("day").unwrap(), DelayBucketing::DayOfWeek);
        assert!(DelayBucketing::parse("fortnight").is_err());
    }
}
