//! Persistence seams for the engine.
//!
//! Backends live elsewhere: the engine ships in-memory implementations and
//! the db crate ships PostgreSQL ones. All methods report backend failures as
//! [`CoreError::Storage`].

use async_trait::async_trait;
use chrono::Duration;

use crate::error::CoreError;
use crate::observation::{
    NewObservation, Observation, ObservationCursor, ObservationFilter, ObservationPage,
};
use crate::prediction::{LedgerFilter, NewPrediction, Prediction};
use crate::target::TargetKey;
use crate::types::{DbId, Timestamp};

/// Append-only observation history.
///
/// Implementations must serialize appends to the same [`TargetKey`] while
/// letting appends to different keys proceed concurrently.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Append an already-validated observation and return it with its id.
    async fn append(&self, observation: NewObservation) -> Result<Observation, CoreError>;

    /// Observations matching `filter`, ordered by `(actual_arrival_time, id)`
    /// ascending, strictly after `cursor`, at most `limit` rows.
    async fn query_page(
        &self,
        filter: &ObservationFilter,
        cursor: Option<ObservationCursor>,
        limit: usize,
    ) -> Result<ObservationPage, CoreError>;

    /// The most recent `limit` observations matching `filter`, returned in
    /// ascending time order.
    async fn recent(
        &self,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<Observation>, CoreError>;

    /// Every series with at least one observation matching `filter`.
    async fn distinct_targets(&self, filter: &ObservationFilter)
        -> Result<Vec<TargetKey>, CoreError>;
}

/// Persisted predictions awaiting resolution.
#[async_trait]
pub trait PredictionLedger: Send + Sync {
    async fn insert(&self, predictions: Vec<NewPrediction>) -> Result<Vec<Prediction>, CoreError>;

    /// Unresolved predictions for the observation's bus and stop whose target
    /// time lies within `tolerance` of the actual arrival and which were
    /// generated no later than the arrival.
    async fn find_resolvable(
        &self,
        observation: &Observation,
        tolerance: Duration,
    ) -> Result<Vec<Prediction>, CoreError>;

    /// Flag a prediction as resolved. Returns `true` only for the call that
    /// flipped the flag, so concurrent resolvers score it exactly once.
    async fn mark_resolved(&self, id: DbId) -> Result<bool, CoreError>;

    /// Latest prediction per (series, algorithm, type, horizon), newest first.
    async fn latest(&self, filter: &LedgerFilter) -> Result<Vec<Prediction>, CoreError>;

    /// Drop unresolved predictions whose target time is before `cutoff`.
    async fn purge_unresolved_before(&self, cutoff: Timestamp) -> Result<u64, CoreError>;
}

/// Existence checks against the external bus/line/stop catalog.
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    async fn bus_exists(&self, bus_id: &str) -> Result<bool, CoreError>;
    async fn line_exists(&self, line_id: &str) -> Result<bool, CoreError>;
    async fn stop_exists(&self, stop_id: &str) -> Result<bool, CoreError>;
}
