//! Row model for the `observations` table.

use busline_core::observation::Observation;
use busline_core::types::{DbId, Timestamp};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ObservationRow {
    pub id: DbId,
    pub bus_id: String,
    pub line_id: String,
    pub stop_id: String,
    pub scheduled_time: Timestamp,
    pub actual_arrival_time: Timestamp,
    pub delay_minutes: i32,
    pub occupancy: Option<f64>,
    pub recorded_at: Timestamp,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Observation {
            id: row.id,
            bus_id: row.bus_id,
            line_id: row.line_id,
            stop_id: row.stop_id,
            scheduled_time: row.scheduled_time,
            actual_arrival_time: row.actual_arrival_time,
            delay_minutes: row.delay_minutes,
            occupancy: row.occupancy,
            recorded_at: row.recorded_at,
        }
    }
}
