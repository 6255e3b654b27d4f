//! Configuration System
//!
//! Layered configuration for the provider, the generation queue, chain pacing, the token
//! budget and logging. Files are TOML; every key has a default, so an empty workspace runs
//! against a local Ollama model with budgeting off.

use crate::crucible::engine::ChainConfig;
use crate::error::ApiError;
use crate::generation::budget::BudgetConfig;
use crate::generation::queue::GenerationConfig;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::provider::{ProviderConfig, ProviderType};

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrucibleConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Persisted planning state
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Story document written by the JSON story sink
    #[serde(default = "default_story_path")]
    pub story_path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".crucible/state.json")
}

fn default_story_path() -> PathBuf {
    PathBuf::from(".crucible/story.json")
}

impl Default for CrucibleConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            generation: GenerationConfig::default(),
            chain: ChainConfig::default(),
            budget: BudgetConfig::default(),
            logging: LoggingConfig::default(),
            state_path: default_state_path(),
            story_path: default_story_path(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Provider(String),
    Generation(String),
    Chain(String),
    Budget(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Generation(msg) => write!(f, "Generation: {}", msg),
            ValidationError::Chain(msg) => write!(f, "Chain: {}", msg),
            ValidationError::Budget(msg) => write!(f, "Budget: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl CrucibleConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if self.generation.max_queue_size == 0 {
            errors.push(ValidationError::Generation(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.generation.event_capacity == 0 {
            errors.push(ValidationError::Generation(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if let Err(e) = self.chain.validate() {
            errors.push(ValidationError::Chain(e));
        }
        if let Err(e) = self.budget.validate() {
            errors.push(ValidationError::Budget(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one `ApiError`.
    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }

    /// Resolve relative paths against `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        if self.state_path.is_relative() {
            self.state_path = root.join(&self.state_path);
        }
        if self.story_path.is_relative() {
            self.story_path = root.join(&self.story_path);
        }
        self
    }
}
