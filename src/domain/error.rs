use thiserror::Error;

/// Common error type for the orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Missing or invalid required input; nothing was mutated
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The task is not owned by a workflow or has been stopped
    #[error("task is not executable: {0}")]
    Unexecutable(String),

    /// Operation is not allowed from the current status
    #[error("cannot {operation} while {from}")]
    IllegalTransition { operation: &'static str, from: String },

    /// A side effect kept failing until its retry limit was reached
    #[error("{effect} gave up after {attempts} attempt(s): {last_error}")]
    SideEffectExhausted { effect: &'static str, attempts: u32, last_error: String },

    /// Task reached its terminal failure after exhausting execution retries
    #[error("task {task_id} failed after {attempts} attempt(s): {reason}")]
    TaskFailed { task_id: String, attempts: u32, reason: String },

    /// Execution was cancelled by a stop request
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Durable state was written by someone else since it was read
    #[error("version conflict on {0}")]
    Conflict(String),

    /// Durable storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Network/transport errors from side-effect adapters
    #[error("network error: {0}")]
    Network(String),

    /// Actor messaging errors
    #[error("actor error: {0}")]
    Actor(String),

    /// Spawn errors
    #[error("spawn error: {0}")]
    Spawn(String),

    /// Timeout errors
    #[error("timed out: {0}")]
    Timeout(String),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String)
}

impl OrchestratorError {
    pub fn illegal(operation: &'static str, from: impl std::fmt::Display) -> Self {
        OrchestratorError::IllegalTransition { operation, from: from.to_string() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled(_))
    }
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Generic(err.to_string())
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// Convert from rocksdb::Error
impl From<rocksdb::Error> for OrchestratorError {
    fn from(err: rocksdb::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for OrchestratorError {
    fn from(err: ractor::SpawnErr) -> Self {
        OrchestratorError::Spawn(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_message() {
        let err = OrchestratorError::illegal("resume", "Running");
        assert_eq!(err.to_string(), "cannot resume while Running");
        assert!(!err.is_cancelled());
        assert!(OrchestratorError::Cancelled("stop".into()).is_cancelled());
    }
}
