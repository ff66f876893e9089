//! Predictive alerts derived from delay predictions.
//!
//! An alert is raised when a prediction forecasts a delay of at least
//! [`LOW_SEVERITY_MINUTES`]. Very large forecasts are reported as likely
//! cancellations.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::prediction::{Prediction, PredictionType};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Thresholds (minutes of predicted delay)
// ---------------------------------------------------------------------------

pub const LOW_SEVERITY_MINUTES: f64 = 5.0;
pub const MEDIUM_SEVERITY_MINUTES: f64 = 10.0;
pub const HIGH_SEVERITY_MINUTES: f64 = 15.0;
/// At or above this the trip is flagged as a probable cancellation.
pub const CANCELLATION_MINUTES: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoreError::Validation(format!(
                "Unknown severity '{other}'. Expected one of: low, medium, high"
            ))),
        }
    }

    pub fn for_delay(predicted_minutes: f64) -> Option<Self> {
        if predicted_minutes >= HIGH_SEVERITY_MINUTES {
            Some(Self::High)
        } else if predicted_minutes >= MEDIUM_SEVERITY_MINUTES {
            Some(Self::Medium)
        } else if predicted_minutes >= LOW_SEVERITY_MINUTES {
            Some(Self::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PredictiveDelay,
    PredictiveCancellation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveAlert {
    /// Id of the prediction the alert was derived from.
    pub id: DbId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub line_id: String,
    pub bus_id: String,
    pub stop_id: String,
    pub predicted_delay_minutes: f64,
    pub confidence: f64,
    pub timestamp: Timestamp,
}

impl PredictiveAlert {
    /// Derive an alert from a delay prediction, if the forecast warrants one.
    pub fn from_prediction(prediction: &Prediction) -> Option<Self> {
        if prediction.prediction_type != PredictionType::Delay {
            return None;
        }
        let delay = prediction.predicted_value;
        let severity = AlertSeverity::for_delay(delay)?;
        let (alert_type, message) = if delay >= CANCELLATION_MINUTES {
            (
                AlertType::PredictiveCancellation,
                format!(
                    "Bus {} on line {} is forecast {:.0} min late at stop {}; the trip may be cancelled",
                    prediction.bus_id, prediction.line_id, delay, prediction.stop_id
                ),
            )
        } else {
            (
                AlertType::PredictiveDelay,
                format!(
                    "Bus {} on line {} is forecast {:.1} min late at stop {}",
                    prediction.bus_id, prediction.line_id, delay, prediction.stop_id
                ),
            )
        };

        Some(Self {
            id: prediction.id,
            alert_type,
            severity,
            message,
            line_id: prediction.line_id.clone(),
            bus_id: prediction.bus_id.clone(),
            stop_id: prediction.stop_id.clone(),
            predicted_delay_minutes: delay,
            confidence: prediction.confidence,
            timestamp: prediction.target_time,
        })
    }
}

/// Alert listing filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    /// Minimum severity to include.
    pub severity: Option<AlertSeverity>,
    pub line_id: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &PredictiveAlert) -> bool {
        self.severity.map_or(true, |min| alert.severity >= min)
            && self.line_id.as_deref().map_or(true, |l| l == alert.line_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::NewPrediction;
    use crate::target::TargetKey;
    use chrono::{TimeZone, Utc};

    fn prediction(value: f64) -> Prediction {
        let key = TargetKey::new("L3", "B7", "S2");
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        NewPrediction::new(&key, "ensemble", PredictionType::Delay, value, 70.0, 60, at)
            .into_prediction(11)
    }

    #[test]
    fn no_alert_below_threshold() {
        assert!(PredictiveAlert::from_prediction(&prediction(4.9)).is_none());
        assert!(PredictiveAlert::from_prediction(&prediction(-8.0)).is_none());
    }

    #[test]
    fn severity_ladder() {
        let sev = |v| PredictiveAlert::from_prediction(&prediction(v)).unwrap().severity;
        assert_eq!(sev(5.0), AlertSeverity::Low);
        assert_eq!(sev(10.0), AlertSeverity::Medium);
        assert_eq!(sev(15.0), AlertSeverity::High);
    }

    #[test]
    fn large_delay_is_cancellation() {
        let alert = PredictiveAlert::from_prediction(&prediction(31.0)).unwrap();
        assert_eq!(alert.alert_type, AlertType::PredictiveCancellation);
        assert_eq!(alert.id, 11);
        assert_eq!(alert.line_id, "L3");
    }

    #[test]
    fn filter_uses_minimum_severity() {
        let medium = PredictiveAlert::from_prediction(&prediction(12.0)).unwrap();
        let filter = AlertFilter {
            severity: Some(AlertSeverity::Medium),
            line_id: None,
        };
        assert!(filter.matches(&medium));
        let filter = AlertFilter {
            severity: Some(AlertSeverity::High),
            line_id: None,
        };
        assert!(!filter.matches(&medium));
        let filter = AlertFilter {
            severity: None,
            line_id: Some("L1".into()),
        };
        assert!(!filter.matches(&medium));
    }
}
