//! Name-to-factory registry for producer drivers.
//!
//! Drivers are selected at configuration time by their `type` string. Each
//! driver crate (or module) provides a [`ProducerFactory`]; the composition
//! root registers the factories it wants, then builds producers from the
//! `[[producers]]` table of the configuration.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ProducerRegistry               │
//! │  factories: HashMap<type, Box<dyn Factory>>  │
//! └──────────────────────┬───────────────────────┘
//!                        │ create(&ProducerDefinition)
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │  ProducerFactory::validate() / ::build()     │
//! │  parses the TOML table, returns a Producer   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use spectro_daq::producer::ProducerRegistry;
//!
//! let registry = ProducerRegistry::with_builtin();
//! let producers = registry.create_all(&config.producers)?;
//! ```

use super::mock::MockProducerFactory;
use super::Producer;
use crate::config::ProducerDefinition;
use crate::error::{DaqError, DaqResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds producers of one driver type from their TOML configuration.
pub trait ProducerFactory: Send + Sync {
    /// Driver type string matched against `type` in the configuration.
    fn driver_type(&self) -> &'static str;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Check a configuration table without building anything.
    fn validate(&self, config: &toml::Value) -> anyhow::Result<()>;

    /// Build a producer with the given id.
    fn build(&self, id: String, config: toml::Value) -> anyhow::Result<Arc<dyn Producer>>;
}

/// Registry of available producer drivers.
#[derive(Default)]
pub struct ProducerRegistry {
    factories: HashMap<&'static str, Box<dyn ProducerFactory>>,
}

impl ProducerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_factory(MockProducerFactory);
        registry
    }

    /// Register a factory, replacing any previous one for the same type.
    pub fn register_factory<F: ProducerFactory + 'static>(&mut self, factory: F) {
        let driver_type = factory.driver_type();
        debug!(driver_type, name = factory.name(), "registering producer factory");
        self.factories.insert(driver_type, Box::new(factory));
    }

    /// Whether a factory exists for `driver_type`.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver types with their names, sorted by type.
    pub fn factory_types(&self) -> Vec<(&'static str, &'static str)> {
        let mut types: Vec<_> = self
            .factories
            .values()
            .map(|f| (f.driver_type(), f.name()))
            .collect();
        types.sort_unstable();
        types
    }

    /// Validate and build one producer.
    pub fn create(&self, definition: &ProducerDefinition) -> DaqResult<Arc<dyn Producer>> {
        let factory = self
            .factories
            .get(definition.r#type.as_str())
            .ok_or_else(|| DaqError::UnknownDriver(definition.r#type.clone()))?;

        let driver_error = |e: anyhow::Error| DaqError::Driver {
            driver: definition.r#type.clone(),
            reason: format!("{}: {e:#}", definition.id),
        };
        factory.validate(&definition.config).map_err(driver_error)?;
        let producer = factory
            .build(definition.id.clone(), definition.config.clone())
            .map_err(driver_error)?;

        info!(producer = %definition.id, driver = factory.name(), "producer created");
        Ok(producer)
    }

    /// Build every enabled producer, failing on the first bad definition.
    ///
    /// Two producers may not read out the same channel: the builder keeps one
    /// time-ordered lane per channel and a `Stop` from either would close it.
    pub fn create_all(&self, definitions: &[ProducerDefinition]) -> DaqResult<Vec<Arc<dyn Producer>>> {
        let producers = definitions
            .iter()
            .filter(|definition| definition.enabled)
            .map(|definition| self.create(definition))
            .collect::<DaqResult<Vec<_>>>()?;

        let mut owners: HashMap<i16, String> = HashMap::new();
        for producer in &producers {
            for channel in producer.channels() {
                if let Some(owner) = owners.insert(channel, producer.id().to_string()) {
                    return Err(DaqError::Configuration(format!(
                        "channel {channel} is read by both '{owner}' and '{}'",
                        producer.id()
                    )));
                }
            }
        }
        Ok(producers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, driver: &str, config: &str, enabled: bool) -> ProducerDefinition {
        ProducerDefinition {
            id: id.to_string(),
            r#type: driver.to_string(),
            enabled,
            config: toml::from_str(config).unwrap(),
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ProducerRegistry::with_builtin();
        assert!(registry.has_factory("mock"));
        assert_eq!(
            registry.factory_types(),
            vec![("mock", "Synthetic List-Mode Source")]
        );
    }

    #[test]
    fn test_create_all_skips_disabled() {
        let registry = ProducerRegistry::with_builtin();
        let producers = registry
            .create_all(&[
                definition("a", "mock", "channels = [0]", true),
                definition("b", "mock", "channels = [1]", false),
            ])
            .unwrap();
        assert_eq!(producers.len(), 1);
        assert_eq!(producers[0].id(), "a");
    }

    #[test]
    fn test_overlapping_channels_rejected() {
        let registry = ProducerRegistry::with_builtin();
        let result = registry.create_all(&[
            definition("a", "mock", "channels = [0, 1]", true),
            definition("b", "mock", "channels = [1, 2]", true),
        ]);
        assert!(matches!(result, Err(DaqError::Configuration(msg)) if msg.contains("channel 1")));

        // Both fall back to the default channel list
        let result = registry.create_all(&[
            definition("a", "mock", "", true),
            definition("b", "mock", "", true),
        ]);
        assert!(matches!(result, Err(DaqError::Configuration(_))));

        // A disabled producer does not claim its channels
        let producers = registry
            .create_all(&[
                definition("a", "mock", "channels = [0, 1]", true),
                definition("b", "mock", "channels = [1]", false),
            ])
            .unwrap();
        assert_eq!(producers.len(), 1);
    }

    #[test]
    fn test_unknown_driver() {
        let registry = ProducerRegistry::with_builtin();
        let result = registry.create(&definition("x", "caen_v1724", "", true));
        assert!(matches!(result, Err(DaqError::UnknownDriver(t)) if t == "caen_v1724"));
    }

    #[test]
    fn test_invalid_config_reported_as_driver_error() {
        let registry = ProducerRegistry::with_builtin();
        let result = registry.create(&definition("x", "mock", "channels = []", true));
        assert!(matches!(result, Err(DaqError::Driver { .. })));
    }
}
