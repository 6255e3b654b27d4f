//! Environment source: CRUCIBLE_<SECTION>__<KEY>, e.g. CRUCIBLE_BUDGET__CAPACITY=2000

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("CRUCIBLE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}
