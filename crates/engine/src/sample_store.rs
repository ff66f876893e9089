//! Sample Store service: validated ingestion and history queries.
//!
//! Wraps an [`ObservationStore`] backend with input validation, catalog
//! checks and the streaming aggregations behind the statistics endpoints.

use std::pin::pin;
use std::sync::Arc;

use busline_core::error::CoreError;
use busline_core::observation::{
    Observation, ObservationCursor, ObservationFilter, ObservationInput, ObservationPage,
};
use busline_core::reporting::{
    DelayDistribution, DelayHistogram, LinePerformance, LinePerformanceAccumulator,
    OccupancyAccumulator, OccupancyTrend, OverviewAccumulator,
};
use busline_core::stats::{DelayAggregator, DelayBucketing, DelayStats};
use busline_core::store::{EntityCatalog, ObservationStore};
use busline_core::target::{Target, TargetKey};
use busline_core::types::Timestamp;
use futures::stream::{self, Stream, TryStreamExt};

use crate::config::EngineConfig;

/// Rows fetched per page when streaming history for an aggregation.
pub const STREAM_PAGE_SIZE: usize = 500;

/// Hard cap on rows returned by [`SampleStore::query`].
pub const MAX_QUERY_ROWS: usize = 10_000;

pub struct SampleStore {
    backend: Arc<dyn ObservationStore>,
    catalog: Arc<dyn EntityCatalog>,
    lookback: chrono::Duration,
    history_limit: usize,
}

impl SampleStore {
    pub fn new(
        backend: Arc<dyn ObservationStore>,
        catalog: Arc<dyn EntityCatalog>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            backend,
            catalog,
            lookback: config.lookback(),
            history_limit: config.history_limit,
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Validate and append one arrival observation.
    pub async fn record(&self, input: &ObservationInput) -> Result<Observation, CoreError> {
        let observation = input.parse()?;
        self.check_catalog(&observation.bus_id, &observation.line_id, &observation.stop_id)
            .await?;

        let key = observation.key();
        match self.backend.append(observation).await {
            Ok(stored) => {
                tracing::debug!(
                    id = stored.id,
                    bus_id = %stored.bus_id,
                    line_id = %stored.line_id,
                    stop_id = %stored.stop_id,
                    delay_minutes = stored.delay_minutes,
                    "Observation recorded"
                );
                Ok(stored)
            }
            Err(e) => {
                tracing::error!(target_key = %key, error = %e, "Observation dropped");
                Err(e)
            }
        }
    }

    async fn check_catalog(
        &self,
        bus_id: &str,
        line_id: &str,
        stop_id: &str,
    ) -> Result<(), CoreError> {
        if !self.catalog.bus_exists(bus_id).await? {
            return Err(CoreError::Validation(format!("Unknown bus '{bus_id}'")));
        }
        if !self.catalog.line_exists(line_id).await? {
            return Err(CoreError::Validation(format!("Unknown line '{line_id}'")));
        }
        if !self.catalog.stop_exists(stop_id).await? {
            return Err(CoreError::Validation(format!("Unknown stop '{stop_id}'")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn query_page(
        &self,
        filter: &ObservationFilter,
        cursor: Option<ObservationCursor>,
        limit: usize,
    ) -> Result<ObservationPage, CoreError> {
        self.backend.query_page(filter, cursor, limit.max(1)).await
    }

    /// Lazily walk every matching observation in `(actual_arrival_time, id)`
    /// order, one page at a time.
    pub fn observation_stream(
        &self,
        filter: ObservationFilter,
        page_size: usize,
    ) -> impl Stream<Item = Result<Observation, CoreError>> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        let page_size = page_size.max(1);

        stream::try_unfold(
            Some((filter, None::<ObservationCursor>)),
            move |state| {
                let backend = Arc::clone(&backend);
                async move {
                    let Some((filter, cursor)) = state else {
                        return Ok::<_, CoreError>(None);
                    };
                    let page = backend.query_page(&filter, cursor, page_size).await?;
                    let next = page.next_cursor.map(|c| (filter, Some(c)));
                    let rows = stream::iter(page.observations.into_iter().map(Ok::<_, CoreError>));
                    Ok(Some((rows, next)))
                }
            },
        )
        .try_flatten()
    }

    /// Collect matching observations, oldest first, up to [`MAX_QUERY_ROWS`].
    pub async fn query(&self, filter: &ObservationFilter) -> Result<Vec<Observation>, CoreError> {
        let page = self.backend.query_page(filter, None, MAX_QUERY_ROWS).await?;
        Ok(page.observations)
    }

    /// Recent history of one series for model input, oldest first.
    pub async fn history(
        &self,
        key: &TargetKey,
        now: Timestamp,
    ) -> Result<Arc<[Observation]>, CoreError> {
        let filter = ObservationFilter::for_key(key).since(now - self.lookback);
        let rows = self.backend.recent(&filter, self.history_limit).await?;
        Ok(rows.into())
    }

    pub async fn distinct_targets(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Vec<TargetKey>, CoreError> {
        self.backend.distinct_targets(filter).await
    }

    /// Concrete series covered by a request scope.
    pub async fn resolve_targets(&self, target: &Target) -> Result<Vec<TargetKey>, CoreError> {
        target.validate()?;
        self.backend.distinct_targets(&target.as_filter()).await
    }

    // -----------------------------------------------------------------------
    // Aggregations
    // -----------------------------------------------------------------------

    async fn fold<A>(
        &self,
        filter: ObservationFilter,
        mut acc: A,
        mut push: impl FnMut(&mut A, &Observation),
    ) -> Result<A, CoreError> {
        let mut rows = pin!(self.observation_stream(filter, STREAM_PAGE_SIZE));
        while let Some(observation) = rows.try_next().await? {
            push(&mut acc, &observation);
        }
        Ok(acc)
    }

    /// Count, mean and variance of delays per bucket. Every bucket is
    /// reported, empty ones with a zero count.
    pub async fn aggregate_delay_stats(
        &self,
        filter: ObservationFilter,
        bucketing: DelayBucketing,
    ) -> Result<Vec<DelayStats>, CoreError> {
        let acc = self
            .fold(filter, DelayAggregator::new(bucketing), |a, o| a.push(o))
            .await?;
        Ok(acc.finish())
    }

    pub async fn delay_distribution(
        &self,
        filter: ObservationFilter,
    ) -> Result<Vec<DelayDistribution>, CoreError> {
        let acc = self
            .fold(filter, DelayHistogram::default(), |a, o| a.push(o))
            .await?;
        Ok(acc.finish())
    }

    pub async fn occupancy_trends(
        &self,
        filter: ObservationFilter,
        bucketing: DelayBucketing,
    ) -> Result<Vec<OccupancyTrend>, CoreError> {
        let acc = self
            .fold(filter, OccupancyAccumulator::new(bucketing), |a, o| a.push(o))
            .await?;
        Ok(acc.finish())
    }

    /// Fleet-wide delay and punctuality figures, before prediction
    /// accuracy and alerts are filled in.
    pub async fn overview(
        &self,
        filter: ObservationFilter,
    ) -> Result<OverviewAccumulator, CoreError> {
        self.fold(filter, OverviewAccumulator::default(), |a, o| a.push(o))
            .await
    }

    pub async fn line_performance(
        &self,
        filter: ObservationFilter,
    ) -> Result<Vec<LinePerformance>, CoreError> {
        let acc = self
            .fold(filter, LinePerformanceAccumulator::default(), |a, o| a.push(o))
            .await?;
        Ok(acc.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{OpenCatalog, StaticCatalog};
    use crate::memory::MemoryObservationStore;
    use assert_matches::assert_matches;
    use futures::StreamExt;

    fn input(bus: &str, line: &str, stop: &str, scheduled: &str, actual: &str) -> ObservationInput {
        ObservationInput {
            bus_id: bus.into(),
            line_id: line.into(),
            stop_id: stop.into(),
            scheduled_time: Some(scheduled.into()),
            actual_arrival_time: Some(actual.into()),
            occupancy: Some(40.0),
        }
    }

    fn open_store() -> SampleStore {
        SampleStore::new(
            Arc::new(MemoryObservationStore::new()),
            Arc::new(OpenCatalog),
            &EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn record_computes_delay() {
        let store = open_store();
        let obs = store
            .record(&input("B1", "L1", "S1", "2024-03-04T08:00:00Z", "2024-03-04T08:07:00Z"))
            .await
            .unwrap();
        assert_eq!(obs.delay_minutes, 7);
        assert!(obs.id > 0);
    }

    #[tokio::test]
    async fn record_rejects_unknown_stop() {
        let catalog = StaticCatalog::new().with_bus("B1").with_line("L1");
        let store = SampleStore::new(
            Arc::new(MemoryObservationStore::new()),
            Arc::new(catalog),
            &EngineConfig::default(),
        );
        let result = store
            .record(&input("B1", "L1", "S9", "2024-03-04T08:00:00Z", "2024-03-04T08:01:00Z"))
            .await;
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("S9"));
    }

    #[tokio::test]
    async fn record_rejects_missing_timestamp() {
        let store = open_store();
        let mut bad = input("B1", "L1", "S1", "2024-03-04T08:00:00Z", "x");
        bad.actual_arrival_time = None;
        assert_matches!(store.record(&bad).await, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn stream_walks_all_pages_in_order() {
        let store = open_store();
        for minute in 0..7 {
            let actual = format!("2024-03-04T08:{minute:02}:00Z");
            store
                .record(&input("B1", "L1", "S1", "2024-03-04T08:00:00Z", &actual))
                .await
                .unwrap();
        }
        let rows: Vec<_> = store
            .observation_stream(ObservationFilter::default(), 3)
            .collect()
            .await;
        let delays: Vec<i32> = rows.into_iter().map(|r| r.unwrap().delay_minutes).collect();
        assert_eq!(delays, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn aggregate_reports_every_bucket() {
        let store = open_store();
        for (scheduled, actual) in [
            ("2024-03-04T08:00:00Z", "2024-03-04T08:02:00Z"),
            ("2024-03-04T08:30:00Z", "2024-03-04T08:34:00Z"),
            ("2024-03-04T17:00:00Z", "2024-03-04T17:10:00Z"),
        ] {
            store.record(&input("B1", "L1", "S1", scheduled, actual)).await.unwrap();
        }
        let stats = store
            .aggregate_delay_stats(ObservationFilter::default(), DelayBucketing::HourOfDay)
            .await
            .unwrap();
        assert_eq!(stats.len(), 24);
        assert_eq!(stats[8].count, 2);
        assert!((stats[8].mean - 3.0).abs() < 1e-9);
        assert!((stats[8].variance - 1.0).abs() < 1e-9);
        assert_eq!(stats[17].count, 1);
        assert_eq!(stats[3].count, 0);
    }

    #[tokio::test]
    async fn resolve_targets_fans_line_scope_out() {
        let store = open_store();
        for (bus, stop) in [("B1", "S1"), ("B2", "S1"), ("B2", "S2")] {
            store
                .record(&input(bus, "L1", stop, "2024-03-04T08:00:00Z", "2024-03-04T08:01:00Z"))
                .await
                .unwrap();
        }
        let keys = store.resolve_targets(&Target::line("L1")).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert_matches!(
            store.resolve_targets(&Target::default()).await,
            Err(CoreError::InvalidScope(_))
        );
    }
}
