//! PostgreSQL implementations of the engine storage traits.

use async_trait::async_trait;
use busline_core::error::CoreError;
use busline_core::observation::{
    NewObservation, Observation, ObservationCursor, ObservationFilter, ObservationPage,
};
use busline_core::prediction::{LedgerFilter, NewPrediction, Prediction};
use busline_core::store::{ObservationStore, PredictionLedger};
use busline_core::target::TargetKey;
use busline_core::types::{DbId, Timestamp};
use chrono::Duration;

use crate::repositories::{ObservationRepo, PredictionRepo};
use crate::DbPool;

fn storage(err: sqlx::Error) -> CoreError {
    tracing::error!(error = %err, "Database operation failed");
    CoreError::Storage(err.to_string())
}

/// Observation history in the `observations` table.
#[derive(Clone)]
pub struct PgObservationStore {
    pool: DbPool,
}

impl PgObservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObservationStore for PgObservationStore {
    async fn append(&self, observation: NewObservation) -> Result<Observation, CoreError> {
        ObservationRepo::insert_serialized(&self.pool, &observation)
            .await
            .map(Observation::from)
            .map_err(storage)
    }

    async fn query_page(
        &self,
        filter: &ObservationFilter,
        cursor: Option<ObservationCursor>,
        limit: usize,
    ) -> Result<ObservationPage, CoreError> {
        let rows = ObservationRepo::list_page(&self.pool, filter, cursor, limit)
            .await
            .map_err(storage)?;
        Ok(ObservationPage::from_rows(
            rows.into_iter().map(Observation::from).collect(),
            limit,
        ))
    }

    async fn recent(
        &self,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<Observation>, CoreError> {
        let rows = ObservationRepo::list_recent(&self.pool, filter, limit)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(Observation::from).collect())
    }

    async fn distinct_targets(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Vec<TargetKey>, CoreError> {
        ObservationRepo::list_series(&self.pool, filter)
            .await
            .map_err(storage)
    }
}

/// Prediction ledger in the `predictions` table.
#[derive(Clone)]
pub struct PgPredictionLedger {
    pool: DbPool,
}

impl PgPredictionLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PredictionLedger for PgPredictionLedger {
    async fn insert(&self, predictions: Vec<NewPrediction>) -> Result<Vec<Prediction>, CoreError> {
        let rows = PredictionRepo::insert_batch(&self.pool, &predictions)
            .await
            .map_err(storage)?;
        tracing::debug!(count = rows.len(), "Predictions persisted");
        rows.into_iter().map(Prediction::try_from).collect()
    }

    async fn find_resolvable(
        &self,
        observation: &Observation,
        tolerance: Duration,
    ) -> Result<Vec<Prediction>, CoreError> {
        let arrival = observation.actual_arrival_time;
        let rows = PredictionRepo::find_unresolved_in_window(
            &self.pool,
            &observation.bus_id,
            &observation.line_id,
            &observation.stop_id,
            arrival - tolerance,
            arrival + tolerance,
            arrival,
        )
        .await
        .map_err(storage)?;
        rows.into_iter().map(Prediction::try_from).collect()
    }

    async fn mark_resolved(&self, id: DbId) -> Result<bool, CoreError> {
        PredictionRepo::mark_resolved(&self.pool, id)
            .await
            .map_err(storage)
    }

    async fn latest(&self, filter: &LedgerFilter) -> Result<Vec<Prediction>, CoreError> {
        let rows = PredictionRepo::list_latest(&self.pool, filter)
            .await
            .map_err(storage)?;
        rows.into_iter().map(Prediction::try_from).collect()
    }

    async fn purge_unresolved_before(&self, cutoff: Timestamp) -> Result<u64, CoreError> {
        PredictionRepo::delete_unresolved_before(&self.pool, cutoff)
            .await
            .map_err(storage)
    }
}
