//! In-memory registry of every live order.
//!
//! The registry keeps an id map and one [`OrderCollection`] per
//! [`CollectionKey`]. Each order is a member of exactly one collection, the
//! one the routing rule of [`OrderRegistry::collection_key_for`] assigns to
//! its state. Only the state transitioner moves orders between collections.
//!
//! Lock order is: order lock, then collection locks in ascending key order,
//! then the id map.

mod collection;

pub use collection::{CollectionEntries, CollectionKey, OrderCollection, OrderHandle};

use broker_storage::OrderPersistence;
use broker_types::{Order, OrderState};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("Collection not found: {0}")]
	CollectionNotFound(CollectionKey),
	#[error("Duplicate order: {0}")]
	DuplicateOrder(String),
	#[error("Rebuild error: {0}")]
	Rebuild(String),
}

/// Problems found by [`OrderRegistry::verify_consistency`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
	/// Ids in the map that no collection holds.
	pub missing: Vec<String>,
	/// Ids present in more than one collection.
	pub duplicated: Vec<String>,
	/// Ids held by a collection other than the one their state routes to.
	pub misfiled: Vec<String>,
	/// Ids held by a collection but absent from the map.
	pub orphaned: Vec<String>,
}

impl ConsistencyReport {
	pub fn is_consistent(&self) -> bool {
		self.missing.is_empty()
			&& self.duplicated.is_empty()
			&& self.misfiled.is_empty()
			&& self.orphaned.is_empty()
	}
}

pub struct OrderRegistry {
	local_provider: String,
	index: RwLock<HashMap<String, Arc<OrderHandle>>>,
	collections: BTreeMap<CollectionKey, OrderCollection>,
}

impl OrderRegistry {
	/// Registry with every collection.
	pub fn new(local_provider: impl Into<String>) -> Self {
		Self::with_collections(local_provider, CollectionKey::all())
	}

	/// Registry holding only the given collections.
	pub fn with_collections(
		local_provider: impl Into<String>,
		keys: impl IntoIterator<Item = CollectionKey>,
	) -> Self {
		Self {
			local_provider: local_provider.into(),
			index: RwLock::new(HashMap::new()),
			collections: keys
				.into_iter()
				.map(|key| (key, OrderCollection::new(key)))
				.collect(),
		}
	}

	pub fn local_provider(&self) -> &str {
		&self.local_provider
	}

	/// Routing rule shared by activation, transition and rebuild.
	///
	/// OPEN orders live in the OPEN collection. Any other state of an order
	/// hosted by a peer maps to `Remote`; local orders map to their state.
	pub fn collection_key_for(&self, order: &Order, state: OrderState) -> CollectionKey {
		if state == OrderState::Open || order.is_provider_local(&self.local_provider) {
			CollectionKey::State(state)
		} else {
			CollectionKey::Remote
		}
	}

	pub fn collection(&self, key: CollectionKey) -> Result<&OrderCollection, RegistryError> {
		self.collections
			.get(&key)
			.ok_or(RegistryError::CollectionNotFound(key))
	}

	/// Collection of a state.
	pub fn orders_list(&self, state: OrderState) -> Result<&OrderCollection, RegistryError> {
		self.collection(CollectionKey::State(state))
	}

	pub fn get(&self, order_id: &str) -> Option<Arc<OrderHandle>> {
		self.index.read().get(order_id).cloned()
	}

	pub fn contains(&self, order_id: &str) -> bool {
		self.index.read().contains_key(order_id)
	}

	pub fn len(&self) -> usize {
		self.index.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.index.read().is_empty()
	}

	/// Snapshots of every live order.
	pub fn snapshots(&self) -> Vec<Order> {
		let handles: Vec<Arc<OrderHandle>> = self.index.read().values().cloned().collect();
		handles.iter().map(|h| h.snapshot()).collect()
	}

	/// Number of orders per collection.
	pub fn collection_sizes(&self) -> BTreeMap<CollectionKey, usize> {
		self.collections
			.iter()
			.map(|(key, collection)| (*key, collection.len()))
			.collect()
	}

	/// Files a new order in the collection its state routes to.
	pub(crate) fn insert(&self, order: Order) -> Result<Arc<OrderHandle>, RegistryError> {
		let handle = Arc::new(OrderHandle::new(order));
		let guard = handle.lock();
		let collection = self.collection(self.collection_key_for(&guard, guard.state))?;

		let mut entries = collection.lock();
		let mut index = self.index.write();
		if index.contains_key(handle.id()) {
			return Err(RegistryError::DuplicateOrder(handle.id().to_string()));
		}
		entries.add(handle.clone());
		index.insert(handle.id().to_string(), handle.clone());
		drop(index);
		drop(entries);
		drop(guard);

		Ok(handle)
	}

	/// Terminal removal from the id map and the order's collection.
	///
	/// Returns the order as it was when removed, `None` if it was not live.
	pub fn remove_order(&self, order_id: &str) -> Result<Option<Order>, RegistryError> {
		let Some(handle) = self.get(order_id) else {
			return Ok(None);
		};
		let order = handle.lock();
		let collection = self.collection(self.collection_key_for(&order, order.state))?;

		let mut entries = collection.lock();
		entries.remove(order_id);
		let removed = self.index.write().remove(order_id).is_some();
		drop(entries);

		Ok(removed.then(|| order.clone()))
	}

	/// Reloads the registry from the persistence gateway.
	///
	/// Every state is read and each order is filed by the routing rule, so
	/// non-OPEN orders hosted by a peer end up in `Remote`. Returns the number
	/// of orders loaded.
	pub async fn rebuild(&self, persistence: &dyn OrderPersistence) -> Result<usize, RegistryError> {
		let mut loaded = 0;
		for state in OrderState::all() {
			let orders = persistence
				.read_active_orders(state)
				.await
				.map_err(|e| RegistryError::Rebuild(format!("Failed to read {} orders: {}", state, e)))?;

			for mut order in orders {
				// The gateway is keyed by state; the snapshot follows it.
				order.state = state;
				match self.insert(order) {
					Ok(_) => loaded += 1,
					Err(RegistryError::DuplicateOrder(id)) => {
						tracing::warn!(order_id = %id, state = %state, "Skipping duplicate order during rebuild");
					},
					Err(e) => return Err(e),
				}
			}
		}
		Ok(loaded)
	}

	/// Cross-checks the id map against the collections.
	///
	/// Meant for tests and diagnostics on a quiescent registry.
	pub fn verify_consistency(&self) -> ConsistencyReport {
		let index: HashMap<String, Arc<OrderHandle>> = self.index.read().clone();
		let mut report = ConsistencyReport::default();
		let mut seen: HashMap<String, CollectionKey> = HashMap::new();

		for (key, collection) in &self.collections {
			for id in collection.snapshot() {
				if seen.insert(id.clone(), *key).is_some() {
					report.duplicated.push(id.clone());
				}
				match index.get(&id) {
					None => report.orphaned.push(id),
					Some(handle) => {
						let order = handle.lock();
						if self.collection_key_for(&order, order.state) != *key {
							report.misfiled.push(id);
						}
					},
				}
			}
		}

		for id in index.keys() {
			if !seen.contains_key(id) {
				report.missing.push(id.clone());
			}
		}
		report
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{volume_order, RecordingPersistence};

	#[test]
	fn test_routing_rule() {
		let registry = OrderRegistry::new("site-a");
		let local = volume_order("site-a", "site-a");
		let remote = volume_order("site-a", "site-b");

		assert_eq!(
			registry.collection_key_for(&remote, OrderState::Open),
			CollectionKey::State(OrderState::Open)
		);
		assert_eq!(
			registry.collection_key_for(&remote, OrderState::Pending),
			CollectionKey::Remote
		);
		assert_eq!(
			registry.collection_key_for(&remote, OrderState::AssignedForDeletion),
			CollectionKey::Remote
		);
		assert_eq!(
			registry.collection_key_for(&local, OrderState::Fulfilled),
			CollectionKey::State(OrderState::Fulfilled)
		);
	}

	#[test]
	fn test_insert_rejects_duplicates() {
		let registry = OrderRegistry::new("site-a");
		let order = volume_order("site-a", "site-a");
		registry.insert(order.clone()).unwrap();

		assert!(matches!(
			registry.insert(order),
			Err(RegistryError::DuplicateOrder(_))
		));
		assert_eq!(registry.len(), 1);
		assert!(registry.verify_consistency().is_consistent());
	}

	#[test]
	fn test_missing_collection() {
		let registry = OrderRegistry::with_collections(
			"site-a",
			[CollectionKey::State(OrderState::Open)],
		);
		assert!(registry.orders_list(OrderState::Open).is_ok());
		assert!(matches!(
			registry.orders_list(OrderState::Spawning),
			Err(RegistryError::CollectionNotFound(CollectionKey::State(OrderState::Spawning)))
		));
	}

	#[test]
	fn test_remove_order() {
		let registry = OrderRegistry::new("site-a");
		let order = volume_order("site-a", "site-a");
		let id = order.id.clone();
		registry.insert(order).unwrap();

		let removed = registry.remove_order(&id).unwrap();
		assert_eq!(removed.map(|o| o.id), Some(id.clone()));
		assert!(!registry.contains(&id));
		assert!(registry.orders_list(OrderState::Open).unwrap().is_empty());
		assert!(registry.remove_order(&id).unwrap().is_none());
	}

	#[tokio::test]
	async fn test_rebuild_files_remote_orders() {
		let persistence = RecordingPersistence::default();
		let mut open_remote = volume_order("site-a", "site-b");
		open_remote.state = OrderState::Open;
		let mut pending_remote = volume_order("site-a", "site-b");
		pending_remote.state = OrderState::Pending;
		let mut fulfilled_local = volume_order("site-a", "site-a");
		fulfilled_local.state = OrderState::Fulfilled;
		let mut failed_local = volume_order("site-a", "site-a");
		failed_local.state = OrderState::FailedAfterSuccessfulRequest;
		for order in [&open_remote, &pending_remote, &fulfilled_local, &failed_local] {
			persistence.seed(order.clone());
		}
		// Same id reported twice is loaded once.
		persistence.seed(fulfilled_local.clone());

		let registry = OrderRegistry::new("site-a");
		let loaded = registry.rebuild(&persistence).await.unwrap();

		assert_eq!(loaded, 4);
		assert!(registry
			.orders_list(OrderState::Open)
			.unwrap()
			.contains(&open_remote.id));
		assert!(registry
			.collection(CollectionKey::Remote)
			.unwrap()
			.contains(&pending_remote.id));
		assert!(registry
			.orders_list(OrderState::Fulfilled)
			.unwrap()
			.contains(&fulfilled_local.id));
		assert!(registry
			.orders_list(OrderState::FailedAfterSuccessfulRequest)
			.unwrap()
			.contains(&failed_local.id));
		assert!(registry.verify_consistency().is_consistent());
	}

	#[tokio::test]
	async fn test_rebuild_aborts_on_gateway_failure() {
		let persistence = RecordingPersistence::default();
		persistence.fail_reads();

		let registry = OrderRegistry::new("site-a");
		let result = registry.rebuild(&persistence).await;
		assert!(matches!(result, Err(RegistryError::Rebuild(_))));
	}

	#[test]
	fn test_consistency_detects_misfiled_order() {
		let registry = OrderRegistry::new("site-a");
		let handle = registry.insert(volume_order("site-a", "site-a")).unwrap();
		// Bypass the transitioner.
		handle.lock().state = OrderState::Spawning;

		let report = registry.verify_consistency();
		assert_eq!(report.misfiled, vec![handle.id().to_string()]);
	}
}
