use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development. Engine tuning lives in [`busline_engine::EngineConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background jobs get to finish after shutdown starts (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL connection string. When absent the engine keeps its
    /// history in memory.
    pub database_url: Option<String>,
    /// Base URL of the bus/line/stop catalog service. When absent every id
    /// is accepted.
    pub catalog_url: Option<String>,
    /// Seconds between sweeps of expired, unresolved predictions (default: `600`).
    pub prediction_sweep_interval_secs: u64,
    /// Seconds between automatic generation passes; `0` disables them (default: `0`).
    pub auto_generate_interval_secs: u64,
    /// JWT validation settings shared with the auth service.
    pub jwt: JwtConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `HOST`                           | `0.0.0.0`               |
    /// | `PORT`                           | `3000`                  |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `30`                    |
    /// | `DATABASE_URL`                   | unset (in-memory)       |
    /// | `CATALOG_URL`                    | unset (accept all ids)  |
    /// | `PREDICTION_SWEEP_INTERVAL_SECS` | `600`                   |
    /// | `AUTO_GENERATE_INTERVAL_SECS`    | `0`                     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let database_url = non_empty_var("DATABASE_URL");
        let catalog_url = non_empty_var("CATALOG_URL");

        let prediction_sweep_interval_secs: u64 = std::env::var("PREDICTION_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("PREDICTION_SWEEP_INTERVAL_SECS must be a valid u64");
        assert!(
            prediction_sweep_interval_secs > 0,
            "PREDICTION_SWEEP_INTERVAL_SECS must be positive"
        );

        let auto_generate_interval_secs: u64 = std::env::var("AUTO_GENERATE_INTERVAL_SECS")
            .unwrap_or_else(|_| "0".into())
            .parse()
            .expect("AUTO_GENERATE_INTERVAL_SECS must be a valid u64");

        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_url,
            catalog_url,
            prediction_sweep_interval_secs,
            auto_generate_interval_secs,
            jwt,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
