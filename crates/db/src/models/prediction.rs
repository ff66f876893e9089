//! Row model for the `predictions` table.

use busline_core::error::CoreError;
use busline_core::prediction::{Prediction, PredictionType};
use busline_core::types::{DbId, Timestamp};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct PredictionRow {
    pub id: DbId,
    pub bus_id: String,
    pub line_id: String,
    pub stop_id: String,
    pub algorithm: String,
    pub prediction_type: String,
    pub predicted_value: f64,
    pub confidence: f64,
    pub horizon: i32,
    pub generated_at: Timestamp,
    pub target_time: Timestamp,
    pub resolved: bool,
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = CoreError;

    fn try_from(row: PredictionRow) -> Result<Self, Self::Error> {
        let prediction_type = PredictionType::parse(&row.prediction_type).map_err(|_| {
            CoreError::Storage(format!(
                "prediction {} has unknown type '{}'",
                row.id, row.prediction_type
            ))
        })?;
        let horizon = u32::try_from(row.horizon).map_err(|_| {
            CoreError::Storage(format!("prediction {} has negative horizon", row.id))
        })?;
        Ok(Prediction {
            id: row.id,
            bus_id: row.bus_id,
            line_id: row.line_id,
            stop_id: row.stop_id,
            algorithm: row.algorithm,
            prediction_type,
            predicted_value: row.predicted_value,
            confidence: row.confidence,
            horizon,
            generated_at: row.generated_at,
            target_time: row.target_time,
            resolved: row.resolved,
        })
    }
}
