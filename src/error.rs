//! Error types for the orchestration core

use thiserror::Error;

/// Result type alias for the orchestration core
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Main error type for the orchestration core.
///
/// These are programmer/infrastructure errors only. Worker timeouts, worker
/// failures, phase-level policy violations and deadline exhaustion are all
/// modeled as values ([`WorkerResult`](crate::worker::WorkerResult),
/// [`RunStatus`](crate::result::RunStatus)) and never surface here.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Two workers were registered under the same name
    #[error("duplicate worker registered: {name}")]
    DuplicateWorker { name: String },

    /// A worker references a phase that was never declared
    #[error("worker {name} references undeclared phase {phase}")]
    UndeclaredPhase { name: String, phase: u32 },

    /// A phase was declared but no worker belongs to it
    #[error("phase {phase} declared with no workers")]
    EmptyPhase { phase: u32 },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error from a storage-backed cache tier
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::DuplicateWorker {
            name: "sentiment".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate worker registered: sentiment");

        let err = OrchestratorError::UndeclaredPhase {
            name: "fundamentals".to_string(),
            phase: 4,
        };
        assert_eq!(
            err.to_string(),
            "worker fundamentals references undeclared phase 4"
        );
    }

    #[test]
    fn test_result_type() {
        fn example_function() -> Result<String> {
            Ok("success".to_string())
        }

        let result = example_function();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "success");
    }
}
