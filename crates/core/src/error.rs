#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Insufficient data for {algorithm}: need at least {required} observations, found {actual}")]
    InsufficientData {
        algorithm: String,
        required: usize,
        actual: usize,
    },

    #[error("Model {algorithm} exceeded its {budget_ms}ms budget")]
    Timeout { algorithm: String, budget_ms: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error is local to a single model run and should be
    /// recovered by excluding the model rather than failing the request.
    pub fn is_model_local(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientData { .. } | CoreError::Timeout { .. }
        )
    }
}
