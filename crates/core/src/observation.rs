//! Observation types, ingestion validation, and the delay computation.
//!
//! An [`Observation`] is one realised arrival of a bus at a stop. It is
//! append-only: created once by the sample store and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::target::TargetKey;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Observations further than this from their schedule are rejected as
/// feed glitches (24 hours either way).
pub const MAX_ABS_DELAY_MINUTES: i64 = 24 * 60;

/// Milliseconds per minute, used by the delay rounding.
const MILLIS_PER_MINUTE: f64 = 60_000.0;

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// A recorded actual-vs-scheduled arrival event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: DbId,
    pub bus_id: String,
    pub line_id: String,
    pub stop_id: String,
    pub scheduled_time: Timestamp,
    pub actual_arrival_time: Timestamp,
    /// Signed whole minutes; negative means early.
    pub delay_minutes: i32,
    /// Passenger load as a percentage of capacity, when the feed reports it.
    pub occupancy: Option<f64>,
    pub recorded_at: Timestamp,
}

impl Observation {
    /// The one definition of delay: `actual - scheduled` in minutes, with the
    /// sub-minute remainder rounded half away from zero.
    pub fn delay_minutes_between(scheduled: Timestamp, actual: Timestamp) -> i32 {
        let millis = (actual - scheduled).num_milliseconds() as f64;
        (millis / MILLIS_PER_MINUTE).round() as i32
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.line_id, &self.bus_id, &self.stop_id)
    }
}

/// A validated observation that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub bus_id: String,
    pub line_id: String,
    pub stop_id: String,
    pub scheduled_time: Timestamp,
    pub actual_arrival_time: Timestamp,
    pub delay_minutes: i32,
    pub occupancy: Option<f64>,
}

impl NewObservation {
    /// Build from already-parsed timestamps; the delay is derived here.
    pub fn new(
        key: &TargetKey,
        scheduled_time: Timestamp,
        actual_arrival_time: Timestamp,
        occupancy: Option<f64>,
    ) -> Self {
        Self {
            bus_id: key.bus_id.clone(),
            line_id: key.line_id.clone(),
            stop_id: key.stop_id.clone(),
            scheduled_time,
            actual_arrival_time,
            delay_minutes: Observation::delay_minutes_between(scheduled_time, actual_arrival_time),
            occupancy,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.line_id, &self.bus_id, &self.stop_id)
    }

    pub fn into_observation(self, id: DbId, recorded_at: Timestamp) -> Observation {
        Observation {
            id,
            bus_id: self.bus_id,
            line_id: self.line_id,
            stop_id: self.stop_id,
            scheduled_time: self.scheduled_time,
            actual_arrival_time: self.actual_arrival_time,
            delay_minutes: self.delay_minutes,
            occupancy: self.occupancy,
            recorded_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestion payload
// ---------------------------------------------------------------------------

/// Raw observation as pushed by the live position feed.
///
/// Timestamps arrive as RFC 3339 strings and are parsed by
/// [`ObservationInput::parse`]; missing fields deserialize to empty values so
/// that validation, not deserialization, reports them.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservationInput {
    #[validate(length(min = 1, max = 64, message = "busId is required"))]
    pub bus_id: String,
    #[validate(length(min = 1, max = 64, message = "lineId is required"))]
    pub line_id: String,
    #[validate(length(min = 1, max = 64, message = "stopId is required"))]
    pub stop_id: String,
    pub scheduled_time: Option<String>,
    pub actual_arrival_time: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "occupancy must be between 0 and 100"))]
    pub occupancy: Option<f64>,
}

impl ObservationInput {
    /// Validate field shapes and parse timestamps into a [`NewObservation`].
    pub fn parse(&self) -> Result<NewObservation, CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let scheduled = parse_timestamp(self.scheduled_time.as_deref(), "scheduledTime")?;
        let actual = parse_timestamp(self.actual_arrival_time.as_deref(), "actualArrivalTime")?;

        if (actual - scheduled).num_minutes().abs() > MAX_ABS_DELAY_MINUTES {
            return Err(CoreError::Validation(format!(
                "actualArrivalTime is more than {MAX_ABS_DELAY_MINUTES} minutes from scheduledTime"
            )));
        }

        let key = TargetKey::new(&self.line_id, &self.bus_id, &self.stop_id);
        Ok(NewObservation::new(&key, scheduled, actual, self.occupancy))
    }
}

fn parse_timestamp(value: Option<&str>, field: &str) -> Result<Timestamp, CoreError> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Validation(format!("{field} is required")))?;

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CoreError::Validation(format!("{field} is not a valid RFC 3339 timestamp: {e}"))
        })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Filter over the observation history. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    pub bus_id: Option<String>,
    pub line_id: Option<String>,
    pub stop_id: Option<String>,
    /// Inclusive lower bound on `actual_arrival_time`.
    pub since: Option<Timestamp>,
    /// Exclusive upper bound on `actual_arrival_time`.
    pub until: Option<Timestamp>,
}

impl ObservationFilter {
    /// Filter selecting exactly one (line, bus, stop) series.
    pub fn for_key(key: &TargetKey) -> Self {
        Self {
            bus_id: Some(key.bus_id.clone()),
            line_id: Some(key.line_id.clone()),
            stop_id: Some(key.stop_id.clone()),
            since: None,
            until: None,
        }
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches_key(&self, key: &TargetKey) -> bool {
        field_matches(&self.bus_id, &key.bus_id)
            && field_matches(&self.line_id, &key.line_id)
            && field_matches(&self.stop_id, &key.stop_id)
    }

    pub fn matches(&self, observation: &Observation) -> bool {
        field_matches(&self.bus_id, &observation.bus_id)
            && field_matches(&self.line_id, &observation.line_id)
            && field_matches(&self.stop_id, &observation.stop_id)
            && self
                .since
                .map_or(true, |since| observation.actual_arrival_time >= since)
            && self
                .until
                .map_or(true, |until| observation.actual_arrival_time < until)
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |e| e == actual)
}

/// Stateless position in the `(actual_arrival_time, id)` ordering.
///
/// A page query returns rows strictly after the cursor, so a consumer can
/// resume from the last row it saw without any server-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationCursor {
    pub after_time: Timestamp,
    pub after_id: DbId,
}

impl ObservationCursor {
    pub fn after(observation: &Observation) -> Self {
        Self {
            after_time: observation.actual_arrival_time,
            after_id: observation.id,
        }
    }

    /// Whether `observation` sorts strictly after this cursor.
    pub fn precedes(&self, observation: &Observation) -> bool {
        (observation.actual_arrival_time, observation.id) > (self.after_time, self.after_id)
    }
}

/// One page of an ordered observation query.
#[derive(Debug, Clone, Default)]
pub struct ObservationPage {
    pub observations: Vec<Observation>,
    /// `None` when the page was not full, i.e. the query is exhausted.
    pub next_cursor: Option<ObservationCursor>,
}

impl ObservationPage {
    /// Build a page, setting the cursor only when `limit` rows came back.
    pub fn from_rows(observations: Vec<Observation>, limit: usize) -> Self {
        let next_cursor = if observations.len() >= limit && limit > 0 {
            observations.last().map(ObservationCursor::after)
        } else {
            None
        };
        Self {
            observations,
            next_cursor,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
