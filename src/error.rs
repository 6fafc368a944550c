//! Error taxonomy for the engine
//!
//! Library functions return [`EngineResult`]. Batch operations and the daily
//! cycle capture these per item / per stage instead of propagating them.

/// Errors raised by the scoring, learning and analysis engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input: empty feature names, out-of-range ratings, unknown enum values.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Vision/embedding collaborator failure or timeout.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// An analysis needs more samples or time windows than are available.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("improvement cycle already in progress (started {started_at})")]
    CycleInProgress { started_at: chrono::DateTime<chrono::Utc> },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound { entity, id: id.into() }
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        EngineError::InsufficientData(message.into())
    }

    /// True for errors meaning "could not be computed" rather than "failed".
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, EngineError::InsufficientData(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = EngineError::not_found("clothing item", "abc");
        assert_eq!(err.to_string(), "clothing item not found: abc");
    }

    #[test]
    fn test_insufficient_data_flag() {
        assert!(EngineError::insufficient("need 10 responses").is_insufficient_data());
        assert!(!EngineError::validation("bad").is_insufficient_data());
    }
}
