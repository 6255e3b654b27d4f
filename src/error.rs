//! Error types for the Crucible generation orchestrator and planner.

use thiserror::Error;

/// Errors raised by a generation session, the queue, or the provider behind them.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The session's cancellation token fired. Not a failure.
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Generation queue is full ({0} requests)")]
    QueueFull(usize),

    #[error("Generation queue is stopped")]
    QueueStopped,

    #[error("Completion channel closed")]
    ChannelClosed,
}

impl GenerationError {
    /// Cancellation resolves quietly; everything else is surfaced once.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }
}

/// Errors raised by the planning state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    /// Output completed but carried no usable tag for this stage.
    #[error("No recognizable {stage} output: {detail}")]
    ParseFailure { stage: &'static str, detail: String },

    #[error("Operation requires phase {expected}, current phase is {actual}")]
    InvalidPhase { expected: String, actual: String },

    #[error("Goal not found: {0}")]
    UnknownGoal(String),

    #[error("Constraint not found: {0}")]
    UnknownConstraint(String),

    #[error("Element not found: {0}")]
    UnknownElement(String),

    #[error("Prerequisite not found: {0}")]
    UnknownPrerequisite(String),

    #[error("Beat index {index} out of range for goal {goal_id}")]
    BeatOutOfRange { goal_id: String, index: usize },

    #[error("No goals selected")]
    NoGoalsSelected,

    #[error("Constraint {0} is ground state and cannot change status")]
    GroundStateLocked(String),

    #[error("Goal {0} already has a generation in flight")]
    GoalBusy(String),

    #[error("Chain for goal {0} is complete; reopen a constraint or truncate it first")]
    ChainComplete(String),
}

impl PlanningError {
    pub fn parse(stage: &'static str, detail: impl Into<String>) -> Self {
        PlanningError::ParseFailure {
            stage,
            detail: detail.into(),
        }
    }
}

/// Storage errors for persisted planning state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("State file not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("State file {path:?} is unreadable: {detail}")]
    Corrupt {
        path: std::path::PathBuf,
        detail: String,
    },
}

/// Top-level error surfaced by services and the CLI.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_failure() {
        assert!(GenerationError::Cancelled.is_cancellation());
        assert!(!GenerationError::Provider("boom".to_string()).is_cancellation());
    }

    #[test]
    fn test_planning_error_wraps_into_api_error() {
        let err: ApiError = PlanningError::UnknownGoal("g9".to_string()).into();
        assert_eq!(err.to_string(), "Goal not found: g9");
    }
}
