//! Engine tuning loaded from environment variables.

use std::time::Duration;

/// Tunables for the prediction and accuracy pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time budget for a single model run.
    pub model_timeout: Duration,
    /// Observations a base model needs before it will predict.
    pub min_observations: usize,
    /// Smoothing factor for the exponential moving average, in `(0, 1)`.
    pub ema_alpha: f64,
    /// Most recent observations fed to the linear regression.
    pub regression_window: usize,
    /// How far back history is read for a prediction.
    pub history_lookback_days: i64,
    /// Cap on observations loaded per target.
    pub history_limit: usize,
    /// Max distance between a prediction's target time and an arrival for
    /// the arrival to resolve it.
    pub resolution_tolerance_minutes: i64,
    /// Unresolved predictions older than this are purged.
    pub prediction_retention_hours: i64,
    /// Horizon used by the batch generation pass.
    pub generate_horizon_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_millis(500),
            min_observations: 3,
            ema_alpha: 0.3,
            regression_window: 20,
            history_lookback_days: 56,
            history_limit: 2000,
            resolution_tolerance_minutes: 5,
            prediction_retention_hours: 24,
            generate_horizon_minutes: 60,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env var                        | Default |
    /// |--------------------------------|---------|
    /// | `PREDICTION_TIMEOUT_MS`        | `500`   |
    /// | `MIN_OBSERVATIONS`             | `3`     |
    /// | `EMA_ALPHA`                    | `0.3`   |
    /// | `REGRESSION_WINDOW`            | `20`    |
    /// | `HISTORY_LOOKBACK_DAYS`        | `56`    |
    /// | `HISTORY_LIMIT`                | `2000`  |
    /// | `RESOLUTION_TOLERANCE_MINUTES` | `5`     |
    /// | `PREDICTION_RETENTION_HOURS`   | `24`    |
    /// | `GENERATE_HORIZON_MINUTES`     | `60`    |
    ///
    /// # Panics
    ///
    /// Panics when a variable is set but cannot be parsed, or when
    /// `EMA_ALPHA` is outside `(0, 1)`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timeout_ms: u64 = env_or(
            "PREDICTION_TIMEOUT_MS",
            defaults.model_timeout.as_millis() as u64,
        );
        let ema_alpha: f64 = env_or("EMA_ALPHA", defaults.ema_alpha);
        assert!(
            ema_alpha > 0.0 && ema_alpha < 1.0,
            "EMA_ALPHA must be between 0 and 1 (exclusive), got {ema_alpha}"
        );

        Self {
            model_timeout: Duration::from_millis(timeout_ms),
            min_observations: env_or("MIN_OBSERVATIONS", defaults.min_observations).max(1),
            ema_alpha,
            regression_window: env_or("REGRESSION_WINDOW", defaults.regression_window).max(2),
            history_lookback_days: env_or("HISTORY_LOOKBACK_DAYS", defaults.history_lookback_days),
            history_limit: env_or("HISTORY_LIMIT", defaults.history_limit).max(1),
            resolution_tolerance_minutes: env_or(
                "RESOLUTION_TOLERANCE_MINUTES",
                defaults.resolution_tolerance_minutes,
            ),
            prediction_retention_hours: env_or(
                "PREDICTION_RETENTION_HOURS",
                defaults.prediction_retention_hours,
            ),
            generate_horizon_minutes: env_or(
                "GENERATE_HORIZON_MINUTES",
                defaults.generate_horizon_minutes,
            ),
        }
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_lookback_days)
    }

    pub fn resolution_tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.resolution_tolerance_minutes)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.prediction_retention_hours)
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Debug,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid value: {e:?}")),
        Err(_) => default,
    }
}
