//! Periodic sweep of expired predictions.
//!
//! Predictions that were never matched by an arrival would otherwise stay in
//! the ledger forever. Anything still unresolved once its target time is
//! older than the engine's retention window is discarded.

use std::sync::Arc;
use std::time::Duration;

use busline_engine::tracker::AccuracyTracker;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Run the prediction retention loop until `cancel` is triggered.
pub async fn run(tracker: Arc<AccuracyTracker>, every: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = every.as_secs(),
        "Prediction retention job started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Prediction retention job stopping");
                break;
            }
            _ = interval.tick() => {
                match tracker.purge_expired(Utc::now()).await {
                    Ok(purged) => {
                        tracing::debug!(purged, "Prediction retention: sweep finished");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Prediction retention: sweep failed");
                    }
                }
            }
        }
    }
}
