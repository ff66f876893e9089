use std::sync::Arc;

use busline_engine::Engine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Prediction engine: sample store, orchestrator and accuracy tracker.
    pub engine: Arc<Engine>,
    /// Server configuration (read by the auth extractor and health check).
    pub config: Arc<ServerConfig>,
    /// Database pool when running against PostgreSQL, `None` for in-memory storage.
    pub pool: Option<busline_db::DbPool>,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        config: Arc<ServerConfig>,
        pool: Option<busline_db::DbPool>,
    ) -> Self {
        Self {
            engine,
            config,
            pool,
        }
    }
}
