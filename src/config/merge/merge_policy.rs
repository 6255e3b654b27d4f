//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only path settings are seeded here; every other section falls back to its serde default,
/// so a partial table in any layer keeps the defaults of the keys it omits.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("state_path", ".crucible/state.json")?
        .set_default("story_path", ".crucible/story.json")
}
