//! Statistics-page aggregates over the observation history.
//!
//! Each accumulator consumes observations one at a time so callers can feed
//! it from a paged stream without materialising the whole history.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::observation::Observation;
use crate::stats::{DelayBucketing, RunningStats};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Arrivals up to this many minutes early still count as on time.
pub const ON_TIME_EARLY_MINUTES: i32 = 1;
/// Arrivals up to this many minutes late still count as on time.
pub const ON_TIME_LATE_MINUTES: i32 = 5;

/// Upper edges (exclusive) of the delay histogram ranges, in minutes.
const DELAY_RANGE_EDGES: [i32; 3] = [5, 10, 15];

pub fn is_on_time(delay_minutes: i32) -> bool {
    (-ON_TIME_EARLY_MINUTES..=ON_TIME_LATE_MINUTES).contains(&delay_minutes)
}

// ---------------------------------------------------------------------------
// Delay distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayDistribution {
    pub delay_range: String,
    pub count: u64,
}

/// Histogram of delays: `early`, `0-5 min`, `5-10 min`, `10-15 min`, `15+ min`.
#[derive(Debug, Clone, Default)]
pub struct DelayHistogram {
    early: u64,
    ranges: [u64; DELAY_RANGE_EDGES.len() + 1],
}

impl DelayHistogram {
    pub fn push(&mut self, observation: &Observation) {
        let delay = observation.delay_minutes;
        if delay < 0 {
            self.early += 1;
            return;
        }
        let slot = DELAY_RANGE_EDGES
            .iter()
            .position(|edge| delay < *edge)
            .unwrap_or(DELAY_RANGE_EDGES.len());
        self.ranges[slot] += 1;
    }

    pub fn finish(self) -> Vec<DelayDistribution> {
        let mut out = vec![DelayDistribution {
            delay_range: "early".to_string(),
            count: self.early,
        }];
        let mut lower = 0;
        for (slot, count) in self.ranges.into_iter().enumerate() {
            let delay_range = match DELAY_RANGE_EDGES.get(slot) {
                Some(upper) => format!("{lower}-{upper} min"),
                None => format!("{lower}+ min"),
            };
            out.push(DelayDistribution { delay_range, count });
            if let Some(upper) = DELAY_RANGE_EDGES.get(slot) {
                lower = *upper;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Occupancy trends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyTrend {
    /// Bucket label, `HH:00` for hourly trends or a weekday for daily ones.
    pub timestamp: String,
    pub average_occupancy: f64,
    pub samples: u64,
}

/// Average occupancy per bucket. Observations without occupancy are skipped.
#[derive(Debug, Clone)]
pub struct OccupancyAccumulator {
    bucketing: DelayBucketing,
    buckets: Vec<RunningStats>,
}

impl OccupancyAccumulator {
    pub fn new(bucketing: DelayBucketing) -> Self {
        Self {
            bucketing,
            buckets: vec![RunningStats::default(); bucketing.bucket_count()],
        }
    }

    pub fn push(&mut self, observation: &Observation) {
        if let Some(occupancy) = observation.occupancy {
            let bucket = self.bucketing.bucket_of(observation.actual_arrival_time);
            self.buckets[bucket].push(occupancy);
        }
    }

    pub fn finish(self) -> Vec<OccupancyTrend> {
        let bucketing = self.bucketing;
        self.buckets
            .into_iter()
            .enumerate()
            .map(|(bucket, stats)| OccupancyTrend {
                timestamp: bucketing.label(bucket),
                average_occupancy: stats.mean(),
                samples: stats.count(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Line performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePerformance {
    pub line_id: String,
    pub average_delay: f64,
    pub on_time_percentage: f64,
    pub total_trips: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LinePerformanceAccumulator {
    lines: BTreeMap<String, (RunningStats, u64)>,
}

impl LinePerformanceAccumulator {
    pub fn push(&mut self, observation: &Observation) {
        let (delays, on_time) = self.lines.entry(observation.line_id.clone()).or_default();
        delays.push(f64::from(observation.delay_minutes));
        if is_on_time(observation.delay_minutes) {
            *on_time += 1;
        }
    }

    pub fn finish(self) -> Vec<LinePerformance> {
        self.lines
            .into_iter()
            .map(|(line_id, (delays, on_time))| LinePerformance {
                line_id,
                average_delay: delays.mean(),
                on_time_percentage: if delays.count() == 0 {
                    0.0
                } else {
                    on_time as f64 * 100.0 / delays.count() as f64
                },
                total_trips: delays.count(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Overview
// ---------------------------------------------------------------------------

/// Headline figures for the statistics dashboard.
///
/// Fleet and line counts cover what has reported arrivals; the catalog of
/// registered buses and lines lives in the CRUD service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsOverview {
    pub active_buses: u64,
    pub active_lines: u64,
    pub total_trips: u64,
    pub average_delay: f64,
    /// On-time share of arrivals, in percent.
    pub average_punctuality: f64,
    pub prediction_accuracy: f64,
    pub active_alerts: u64,
}

#[derive(Debug, Clone, Default)]
pub struct OverviewAccumulator {
    buses: BTreeSet<String>,
    lines: BTreeSet<String>,
    delays: RunningStats,
    on_time: u64,
}

impl OverviewAccumulator {
    pub fn push(&mut self, observation: &Observation) {
        if !self.buses.contains(&observation.bus_id) {
            self.buses.insert(observation.bus_id.clone());
        }
        if !self.lines.contains(&observation.line_id) {
            self.lines.insert(observation.line_id.clone());
        }
        self.delays.push(f64::from(observation.delay_minutes));
        if is_on_time(observation.delay_minutes) {
            self.on_time += 1;
        }
    }

    pub fn finish(self, prediction_accuracy: f64, active_alerts: u64) -> StatisticsOverview {
        let trips = self.delays.count();
        StatisticsOverview {
            active_buses: self.buses.len() as u64,
            active_lines: self.lines.len() as u64,
            total_trips: trips,
            average_delay: self.delays.mean(),
            average_punctuality: if trips == 0 {
                0.0
            } else {
                self.on_time as f64 * 100.0 / trips as f64
            },
            prediction_accuracy,
            active_alerts,
        }
    }
}
