//! Prediction scopes.
//!
//! A [`Target`] is what a caller asks about (any combination of bus, line
//! and stop); a [`TargetKey`] is one concrete (line, bus, stop) series in the
//! sample store. Requests with a partial scope fan out to every key that
//! matches.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::observation::ObservationFilter;

/// One concrete observation series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetKey {
    pub line_id: String,
    pub bus_id: String,
    pub stop_id: String,
}

impl TargetKey {
    pub fn new(line_id: &str, bus_id: &str, stop_id: &str) -> Self {
        Self {
            line_id: line_id.to_string(),
            bus_id: bus_id.to_string(),
            stop_id: stop_id.to_string(),
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.line_id, self.bus_id, self.stop_id)
    }
}

/// Requested prediction scope. Blank strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub bus_id: Option<String>,
    pub line_id: Option<String>,
    pub stop_id: Option<String>,
}

impl Target {
    pub fn new(bus_id: Option<String>, line_id: Option<String>, stop_id: Option<String>) -> Self {
        Self {
            bus_id: normalize(bus_id),
            line_id: normalize(line_id),
            stop_id: normalize(stop_id),
        }
    }

    pub fn bus(bus_id: &str) -> Self {
        Self::new(Some(bus_id.to_string()), None, None)
    }

    pub fn line(line_id: &str) -> Self {
        Self::new(None, Some(line_id.to_string()), None)
    }

    pub fn bus_at_stop(bus_id: &str, stop_id: &str) -> Self {
        Self::new(Some(bus_id.to_string()), None, Some(stop_id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.bus_id.is_none() && self.line_id.is_none() && self.stop_id.is_none()
    }

    /// Fails with [`CoreError::InvalidScope`] when no scope field is set.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_empty() {
            return Err(CoreError::InvalidScope(
                "at least one of busId, lineId or stopId is required".into(),
            ));
        }
        Ok(())
    }

    pub fn as_filter(&self) -> ObservationFilter {
        ObservationFilter {
            bus_id: self.bus_id.clone(),
            line_id: self.line_id.clone(),
            stop_id: self.stop_id.clone(),
            since: None,
            until: None,
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
