//! Query parameter types and JSON-rejecting extractors for API handlers.
//!
//! Query strings use the same camelCase names as the response bodies.

use axum::extract::{FromRequest, FromRequestParts};
use busline_core::observation::{ObservationCursor, ObservationFilter};
use busline_core::types::{DbId, Timestamp};
use serde::Deserialize;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// [`axum::extract::Query`] whose rejection is rendered as an [`AppError`],
/// so malformed query strings get the standard `{ error, code }` body.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// [`axum::Json`] with the same error rendering as [`ApiQuery`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// `GET /predictions`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionsQuery {
    pub bus_id: Option<String>,
    pub line_id: Option<String>,
    pub stop_id: Option<String>,
    pub algorithm: Option<String>,
    #[serde(rename = "type")]
    pub prediction_type: Option<String>,
    pub horizon: Option<u32>,
    pub limit: Option<usize>,
}

/// `GET /predictions/bus/{bus_id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusPredictionsQuery {
    pub stop_id: Option<String>,
    pub algorithm: Option<String>,
    pub horizon: Option<u32>,
}

/// `GET /predictions/alerts`.
#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    /// Minimum severity: `low`, `medium` or `high`.
    pub severity: Option<String>,
    pub line: Option<String>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Scope shared by the statistics endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeQuery {
    pub bus_id: Option<String>,
    pub line_id: Option<String>,
    pub stop_id: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
}

impl ScopeQuery {
    pub fn to_filter(&self) -> ObservationFilter {
        ObservationFilter {
            bus_id: non_empty(&self.bus_id),
            line_id: non_empty(&self.line_id),
            stop_id: non_empty(&self.stop_id),
            since: self.since,
            until: self.until,
        }
    }
}

/// `GET /statistics/occupancy-trends`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyQuery {
    /// `hour` (default) or `day`.
    pub period: Option<String>,
    #[serde(flatten)]
    pub scope: ScopeQuery,
}

/// `GET /statistics/delay-stats`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayStatsQuery {
    /// `hour` (default), `day` or `day_hour`.
    pub bucketing: Option<String>,
    #[serde(flatten)]
    pub scope: ScopeQuery,
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// `GET /observations`: one page of history, resumable via the cursor of
/// the previous page.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationsQuery {
    pub bus_id: Option<String>,
    pub line_id: Option<String>,
    pub stop_id: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub after_time: Option<Timestamp>,
    pub after_id: Option<DbId>,
    pub limit: Option<usize>,
}

impl ObservationsQuery {
    pub fn to_filter(&self) -> ObservationFilter {
        ObservationFilter {
            bus_id: non_empty(&self.bus_id),
            line_id: non_empty(&self.line_id),
            stop_id: non_empty(&self.stop_id),
            since: self.since,
            until: self.until,
        }
    }

    /// The resume position; both halves must be given together.
    pub fn cursor(&self) -> Result<Option<ObservationCursor>, AppError> {
        match (self.after_time, self.after_id) {
            (Some(after_time), Some(after_id)) => Ok(Some(ObservationCursor {
                after_time,
                after_id,
            })),
            (None, None) => Ok(None),
            _ => Err(AppError::BadRequest(
                "afterTime and afterId must be given together".into(),
            )),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
