//! Wiring of the sample store, registry, orchestrator and tracker.

use std::sync::Arc;

use busline_core::alert::AlertFilter;
use busline_core::error::CoreError;
use busline_core::observation::{Observation, ObservationFilter, ObservationInput};
use busline_core::reporting::StatisticsOverview;
use busline_core::store::{EntityCatalog, ObservationStore, PredictionLedger};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::memory::{MemoryObservationStore, MemoryPredictionLedger};
use crate::models::ModelRegistry;
use crate::orchestrator::PredictionOrchestrator;
use crate::sample_store::SampleStore;
use crate::tracker::{AccuracyBoard, AccuracyTracker, ResolvedPrediction};

/// Result of ingesting one observation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingested {
    pub observation: Observation,
    pub resolved_predictions: Vec<ResolvedPrediction>,
}

/// Handle to the whole prediction pipeline. Cheap to share behind an `Arc`.
pub struct Engine {
    pub samples: Arc<SampleStore>,
    pub orchestrator: Arc<PredictionOrchestrator>,
    pub tracker: Arc<AccuracyTracker>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ObservationStore>,
        ledger: Arc<dyn PredictionLedger>,
        catalog: Arc<dyn EntityCatalog>,
    ) -> Self {
        let registry = ModelRegistry::standard(&config);
        Self::with_registry(config, registry, store, ledger, catalog)
    }

    pub fn with_registry(
        config: EngineConfig,
        registry: ModelRegistry,
        store: Arc<dyn ObservationStore>,
        ledger: Arc<dyn PredictionLedger>,
        catalog: Arc<dyn EntityCatalog>,
    ) -> Self {
        let board = Arc::new(AccuracyBoard::with_algorithms(registry.ids()));
        let samples = Arc::new(SampleStore::new(store, catalog, &config));
        let tracker = Arc::new(AccuracyTracker::new(
            Arc::clone(&ledger),
            Arc::clone(&board),
            &config,
        ));
        let orchestrator = Arc::new(PredictionOrchestrator::new(
            Arc::clone(&samples),
            Arc::new(registry),
            ledger,
            board,
            config.clone(),
        ));
        Self {
            samples,
            orchestrator,
            tracker,
            config,
        }
    }

    /// Engine backed by in-memory storage.
    pub fn in_memory(config: EngineConfig, catalog: Arc<dyn EntityCatalog>) -> Self {
        Self::new(
            config,
            Arc::new(MemoryObservationStore::new()),
            Arc::new(MemoryPredictionLedger::new()),
            catalog,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record an observation, then resolve the predictions it settles.
    ///
    /// Resolution problems never fail the ingestion.
    pub async fn record_observation(&self, input: &ObservationInput) -> Result<Ingested, CoreError> {
        let observation = self.samples.record(input).await?;
        let summary = self.tracker.on_observation(&observation).await;
        if summary.failed > 0 {
            tracing::warn!(
                observation_id = observation.id,
                failed = summary.failed,
                "Some predictions could not be resolved"
            );
        }
        Ok(Ingested {
            observation,
            resolved_predictions: summary.resolved,
        })
    }

    /// Dashboard headline figures over the history matching `filter`.
    pub async fn statistics_overview(
        &self,
        filter: ObservationFilter,
    ) -> Result<StatisticsOverview, CoreError> {
        let history = self.samples.overview(filter).await?;
        let alerts = self
            .orchestrator
            .predictive_alerts(&AlertFilter::default())
            .await?;
        let accuracy = self.tracker.board().overall_accuracy();
        Ok(history.finish(accuracy, alerts.len() as u64))
    }
}
