//! Factory registry for broker implementations.
//!
//! Collects the factory functions every implementation crate exports and
//! selects the ones a configuration refers to.

use broker_cloud::CloudFactory;
use broker_config::Config;
use broker_core::BrokerFactories;
use broker_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Every known implementation factory by name.
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub cloud: HashMap<String, CloudFactory>,
}

impl FactoryRegistry {
	fn new() -> Self {
		let mut storage = HashMap::new();
		for (name, factory) in broker_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			storage.insert(name.to_string(), factory);
		}

		let mut cloud = HashMap::new();
		for (name, factory) in broker_cloud::get_all_implementations() {
			tracing::debug!("Registering cloud plugin: {}", name);
			cloud.insert(name.to_string(), factory);
		}

		Self { storage, cloud }
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(FactoryRegistry::new)
}

fn unknown(kind: &str, name: &str, available: &HashMap<String, impl Sized>) -> String {
	let mut names: Vec<_> = available.keys().cloned().collect();
	names.sort();
	format!(
		"Unknown {} implementation '{}'. Available: [{}]",
		kind,
		name,
		names.join(", ")
	)
}

/// Factories for the storage backends and cloud plugins `config` names.
pub fn factories_for(
	config: &Config,
) -> Result<BrokerFactories<StorageFactory, CloudFactory>, String> {
	let registry = get_registry();

	let mut storage_factories = HashMap::new();
	for name in config.storage.implementations.keys() {
		let factory = registry
			.storage
			.get(name)
			.ok_or_else(|| unknown("storage", name, &registry.storage))?;
		storage_factories.insert(name.clone(), *factory);
	}

	let mut cloud_factories = HashMap::new();
	for cloud in config.clouds.implementations.keys() {
		let plugin = config.clouds.plugin_for(cloud).unwrap_or(cloud.as_str());
		let factory = registry
			.cloud
			.get(plugin)
			.ok_or_else(|| unknown("cloud", plugin, &registry.cloud))?;
		cloud_factories.insert(plugin.to_string(), *factory);
	}

	Ok(BrokerFactories {
		storage_factories,
		cloud_factories,
	})
}
