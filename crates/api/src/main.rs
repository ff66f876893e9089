use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use busline_core::store::{EntityCatalog, ObservationStore, PredictionLedger};
use busline_db::store::{PgObservationStore, PgPredictionLedger};
use busline_engine::catalog::{HttpCatalog, OpenCatalog};
use busline_engine::memory::{MemoryObservationStore, MemoryPredictionLedger};
use busline_engine::{Engine, EngineConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use busline_api::background;
use busline_api::config::ServerConfig;
use busline_api::router::build_app_router;
use busline_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "busline_api=debug,busline_engine=debug,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        model_timeout_ms = engine_config.model_timeout.as_millis() as u64,
        min_observations = engine_config.min_observations,
        "Loaded engine configuration"
    );

    // --- Storage ---
    let (pool, store, ledger): (
        Option<busline_db::DbPool>,
        Arc<dyn ObservationStore>,
        Arc<dyn PredictionLedger>,
    ) = match &config.database_url {
        Some(database_url) => {
            let pool = busline_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            busline_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            busline_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            let store: Arc<dyn ObservationStore> = Arc::new(PgObservationStore::new(pool.clone()));
            let ledger: Arc<dyn PredictionLedger> = Arc::new(PgPredictionLedger::new(pool.clone()));
            (Some(pool), store, ledger)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping observations and predictions in memory");
            let store: Arc<dyn ObservationStore> = Arc::new(MemoryObservationStore::new());
            let ledger: Arc<dyn PredictionLedger> = Arc::new(MemoryPredictionLedger::new());
            (None, store, ledger)
        }
    };

    // --- Entity catalog ---
    let catalog: Arc<dyn EntityCatalog> = match &config.catalog_url {
        Some(url) => {
            let catalog = HttpCatalog::new(url).expect("Invalid CATALOG_URL");
            tracing::info!(catalog_url = %url, "Using HTTP entity catalog");
            Arc::new(catalog)
        }
        None => {
            tracing::warn!("CATALOG_URL not set, accepting every bus, line and stop id");
            Arc::new(OpenCatalog)
        }
    };

    // --- Engine ---
    let engine = Arc::new(Engine::new(engine_config, store, ledger, catalog));
    tracing::info!(
        algorithms = ?engine.orchestrator.registry().ids(),
        "Prediction engine ready"
    );

    // --- Background jobs ---
    let background_cancel = CancellationToken::new();
    let mut background_handles = Vec::new();

    background_handles.push(tokio::spawn(background::prediction_retention::run(
        Arc::clone(&engine.tracker),
        Duration::from_secs(config.prediction_sweep_interval_secs),
        background_cancel.clone(),
    )));

    if config.auto_generate_interval_secs > 0 {
        background_handles.push(tokio::spawn(background::prediction_generation::run(
            Arc::clone(&engine.orchestrator),
            engine.config().generate_horizon_minutes,
            Duration::from_secs(config.auto_generate_interval_secs),
            background_cancel.clone(),
        )));
    }

    // --- Router ---
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let state = AppState::new(engine, Arc::new(config.clone()), pool);
    let app = build_app_router(state, &config);

    // --- Start server ---
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    background_cancel.cancel();
    for handle in background_handles {
        let _ = tokio::time::timeout(shutdown_timeout, handle).await;
    }
    tracing::info!("Background jobs stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
