//! In-memory storage backend.
//!
//! Values live in one ordered map keyed by `<namespace>:<id>`, so a
//! namespace listing is a range scan. Nothing survives a restart; the
//! scenario tests and single-process federations use it.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use broker_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
pub struct MemoryStorage {
	entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of stored keys across all namespaces.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

// The map lock is never held across an await point.
#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.entries
			.read()
			.get(key)
			.cloned()
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		self.entries.write().insert(key.to_owned(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.write().remove(key);
		Ok(())
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let entries = self.entries.read();
		let keys = entries
			.range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
			.map(|(key, _)| key)
			.take_while(|key| key.starts_with(prefix))
			.cloned()
			.collect();
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// The memory backend takes no options; any table is accepted.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_overwrite_and_delete() {
		let storage = MemoryStorage::new();
		storage.set_bytes("orders:o-1", b"open".to_vec()).await.unwrap();
		storage.set_bytes("orders:o-1", b"spawning".to_vec()).await.unwrap();

		assert_eq!(storage.get_bytes("orders:o-1").await.unwrap(), b"spawning");
		assert_eq!(storage.len(), 1);

		storage.delete("orders:o-1").await.unwrap();
		// Deleting a missing key is not an error.
		storage.delete("orders:o-1").await.unwrap();
		assert!(storage.is_empty());
		assert!(matches!(
			storage.get_bytes("orders:o-1").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_prefix_listing_stays_in_namespace() {
		let storage = MemoryStorage::new();
		for key in ["orders:b", "orders:a", "state_changes:x", "ordersx:c", "removals:a"] {
			storage.set_bytes(key, vec![1]).await.unwrap();
		}

		let keys = storage.keys_with_prefix("orders:").await.unwrap();
		assert_eq!(keys, vec!["orders:a".to_string(), "orders:b".to_string()]);
		assert!(storage.keys_with_prefix("sync_requests:").await.unwrap().is_empty());
	}

	#[test]
	fn test_factory_rejects_non_table() {
		let result = create_storage(&toml::Value::String("nope".into()));
		assert!(matches!(result, Err(StorageError::Configuration(_))));
	}
}
