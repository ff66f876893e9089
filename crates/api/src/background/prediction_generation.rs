//! Scheduled batch generation pass.
//!
//! Runs the ensemble over every series with recent history, the same work
//! `POST /predictions/generate` triggers on demand. Only spawned when
//! `AUTO_GENERATE_INTERVAL_SECS` is non-zero.

use std::sync::Arc;
use std::time::Duration;

use busline_engine::orchestrator::PredictionOrchestrator;
use tokio_util::sync::CancellationToken;

/// Run the generation loop until `cancel` is triggered.
pub async fn run(
    orchestrator: Arc<PredictionOrchestrator>,
    horizon_minutes: u32,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = every.as_secs(),
        horizon_minutes,
        "Prediction generation job started"
    );

    let mut interval = tokio::time::interval(every);
    // First pass runs one interval after startup.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Prediction generation job stopping");
                break;
            }
            _ = interval.tick() => {
                match orchestrator.generate_all(horizon_minutes).await {
                    Ok(summary) => {
                        tracing::debug!(
                            targets = summary.targets,
                            generated = summary.generated,
                            "Prediction generation: pass finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Prediction generation: pass failed");
                    }
                }
            }
        }
    }
}
