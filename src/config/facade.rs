//! Configuration loading entry point.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::CrucibleConfig;
use config::{ConfigError, File};
use std::path::Path;
use tracing::debug;

/// Loads [`CrucibleConfig`] from layered sources.
///
/// Precedence, lowest first: built-in defaults, the global file, workspace files, then
/// `CRUCIBLE_*` environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(workspace_root: &Path) -> Result<CrucibleConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);
        let config: CrucibleConfig = builder.build()?.try_deserialize()?;
        debug!(workspace_root = %workspace_root.display(), "Configuration loaded");
        Ok(config.rooted_at(workspace_root))
    }

    /// Load from one explicit file. Environment variables still apply on top.
    pub fn load_from_file(path: &Path) -> Result<CrucibleConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true));
        let builder = environment::add_to_builder(builder);
        let config: CrucibleConfig = builder.build()?.try_deserialize()?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.rooted_at(root))
    }
}
