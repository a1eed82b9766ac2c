use autopara::core::models::record::Property;
use autopara::engine::config::DEFAULT_OUTPUT_PREFIX;

/// Values used when neither the config file, `--set`, a flag nor the environment
/// provides one.
pub struct DefaultsConfig {
    pub properties: Vec<Property>,
    pub output_prefix: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            properties: vec![Property::Energy, Property::Forces],
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
        }
    }
}
