//! Persistence gateway of the order lifecycle.
//!
//! The registry reloads active orders through this gateway at startup and
//! the transitioner reports every state change to it. `StoragePersistence`
//! maps the gateway onto the key/value [`StorageService`]:
//!
//! - `orders:<id>` latest snapshot of each live order
//! - `state_changes:<uuid>` append-only [`StateChangeRecord`]s
//! - `sync_requests:<uuid>` append-only [`SyncRecord`]s
//! - `removals:<id>` [`RemovalRecord`] tombstones
//!
//! Audits arrive after the transition's locks are released, so they may
//! be reordered. A snapshot is only written when its `version` is newer
//! than both the stored snapshot and the order's tombstone.

use crate::{StorageError, StorageService};
use async_trait::async_trait;
use broker_types::{Order, OrderState, RemovalRecord, StateChangeRecord, StorageKey, SyncRecord};
use tokio::sync::Mutex;

/// Read/write contract between the lifecycle engine and durable storage.
#[async_trait]
pub trait OrderPersistence: Send + Sync {
	/// Orders last recorded in `state` that have not been removed.
	async fn read_active_orders(&self, state: OrderState) -> Result<Vec<Order>, StorageError>;

	/// Records that `order` (already carrying its new fields) entered `new_state`.
	async fn record_state_change(
		&self,
		order: &Order,
		new_state: OrderState,
		timestamp: u64,
	) -> Result<(), StorageError>;

	/// Records one reconciliation exchange with a peer.
	async fn record_sync_request(&self, record: &SyncRecord) -> Result<(), StorageError>;

	/// Records the terminal removal of `order`, as it was when removed.
	async fn record_removal(&self, order: &Order, timestamp: u64) -> Result<(), StorageError>;
}

/// Gateway backed by a [`StorageService`].
pub struct StoragePersistence {
	storage: StorageService,
	/// Serializes the read-modify-write of order snapshots.
	write_lock: Mutex<()>,
}

impl StoragePersistence {
	pub fn new(storage: StorageService) -> Self {
		Self {
			storage,
			write_lock: Mutex::new(()),
		}
	}

	/// State change records of one order in insertion order.
	pub async fn state_changes(&self, order_id: &str) -> Result<Vec<StateChangeRecord>, StorageError> {
		let mut records: Vec<StateChangeRecord> = self
			.storage
			.retrieve_all(StorageKey::StateChanges.as_str())
			.await?
			.into_iter()
			.map(|(_, record)| record)
			.filter(|record: &StateChangeRecord| record.order_id == order_id)
			.collect();
		records.sort_by_key(|record| (record.version, record.timestamp));
		Ok(records)
	}

	/// Every recorded reconciliation exchange.
	pub async fn sync_requests(&self) -> Result<Vec<SyncRecord>, StorageError> {
		Ok(self
			.storage
			.retrieve_all(StorageKey::SyncRequests.as_str())
			.await?
			.into_iter()
			.map(|(_, record)| record)
			.collect())
	}

	fn record_id(timestamp: u64) -> String {
		// Timestamp first keeps records sorted by time within a namespace.
		format!("{:020}-{}", timestamp, uuid::Uuid::new_v4())
	}

	async fn find<T: serde::de::DeserializeOwned>(
		&self,
		key: StorageKey,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.storage.retrieve::<T>(key.as_str(), id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}
}

#[async_trait]
impl OrderPersistence for StoragePersistence {
	async fn read_active_orders(&self, state: OrderState) -> Result<Vec<Order>, StorageError> {
		let orders: Vec<(String, Order)> =
			self.storage.retrieve_all(StorageKey::Orders.as_str()).await?;
		Ok(orders
			.into_iter()
			.map(|(_, order)| order)
			.filter(|order| order.state == state)
			.collect())
	}

	async fn record_state_change(
		&self,
		order: &Order,
		new_state: OrderState,
		timestamp: u64,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;

		let tombstone: Option<RemovalRecord> = self.find(StorageKey::Removals, &order.id).await?;
		let stored: Option<Order> = self.find(StorageKey::Orders, &order.id).await?;
		let newest = stored
			.as_ref()
			.map(|o| o.version)
			.into_iter()
			.chain(tombstone.as_ref().map(|t| t.version))
			.max();
		let current = newest.is_none_or(|version| order.version > version);

		if current {
			let mut snapshot = order.clone();
			snapshot.state = new_state;
			self.storage
				.store(StorageKey::Orders.as_str(), &order.id, &snapshot)
				.await?;
		} else {
			tracing::debug!(
				order_id = %order.id,
				version = order.version,
				"Skipped stale order snapshot"
			);
		}

		let record = StateChangeRecord {
			order_id: order.id.clone(),
			from: stored.filter(|_| current).map(|previous| previous.state),
			to: new_state,
			version: order.version,
			timestamp,
		};
		self.storage
			.store(
				StorageKey::StateChanges.as_str(),
				&Self::record_id(timestamp),
				&record,
			)
			.await
	}

	async fn record_sync_request(&self, record: &SyncRecord) -> Result<(), StorageError> {
		self.storage
			.store(
				StorageKey::SyncRequests.as_str(),
				&Self::record_id(record.timestamp),
				record,
			)
			.await
	}

	async fn record_removal(&self, order: &Order, timestamp: u64) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let tombstone = RemovalRecord {
			order_id: order.id.clone(),
			version: order.version,
			timestamp,
		};
		self.storage
			.store(StorageKey::Removals.as_str(), &order.id, &tombstone)
			.await?;
		self.storage
			.remove(StorageKey::Orders.as_str(), &order.id)
			.await?;
		tracing::debug!(order_id = %order.id, version = order.version, "Removed order snapshot");
		Ok(())
	}
}
