//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{ApiError, GenerationError, PlanningError};

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::Planning(PlanningError::InvalidPhase { .. }) => {
            format!("{}\nRun `crucible status` to see where the plan is.", e)
        }
        ApiError::Planning(PlanningError::NoGoalsSelected) => {
            format!("{}\nUse `crucible select <goal-id>` first.", e)
        }
        ApiError::Generation(GenerationError::ProviderAuthFailed(_)) => {
            format!("{}\nCheck provider.api_key_env in crucible.toml.", e)
        }
        ApiError::Generation(GenerationError::ProviderRequestFailed(_)) => {
            format!("{}\nThe request was not retried; run the command again.", e)
        }
        _ => e.to_string(),
    }
}
