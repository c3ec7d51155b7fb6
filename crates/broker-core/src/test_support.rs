//! Fixtures and recording fakes shared by the unit tests.

use crate::workers::ReachabilityProbe;
use async_trait::async_trait;
use broker_federation::{FederationEnvelope, FederationError, FederationResponse, PeerClient};
use broker_storage::implementations::memory::MemoryStorage;
use broker_storage::{OrderPersistence, StorageError, StoragePersistence, StorageService};
use broker_types::{
	ComputeSpec, FederationUser, Instance, Order, OrderPayload, OrderState, SyncRecord, VolumeSpec,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, Semaphore};

pub fn user() -> FederationUser {
	FederationUser {
		user_id: "u-1".into(),
		user_name: "alice".into(),
		identity_provider: "site-a".into(),
	}
}

pub fn volume_order(requesting: &str, target: &str) -> Order {
	Order::new(
		user(),
		requesting,
		target,
		"default",
		OrderPayload::Volume(VolumeSpec {
			name: "data".into(),
			size_gb: 10,
		}),
	)
}

pub fn compute_order(requesting: &str, target: &str) -> Order {
	Order::new(
		user(),
		requesting,
		target,
		"default",
		OrderPayload::Compute(ComputeSpec {
			name: "vm".into(),
			vcpu: 2,
			ram_mb: 2048,
			disk_gb: 20,
			image_id: "img-1".into(),
			network_order_ids: vec![],
			public_key: None,
		}),
	)
}

/// Gateway fake that keeps everything in memory.
#[derive(Default)]
pub struct RecordingPersistence {
	seeded: Mutex<Vec<Order>>,
	changes: Mutex<Vec<(String, OrderState)>>,
	syncs: Mutex<Vec<SyncRecord>>,
	removed: Mutex<Vec<String>>,
	fail_reads: AtomicBool,
	fail_writes: AtomicBool,
}

impl RecordingPersistence {
	/// Adds an order returned by `read_active_orders`.
	pub fn seed(&self, order: Order) {
		self.seeded.lock().push(order);
	}

	pub fn fail_reads(&self) {
		self.fail_reads.store(true, Ordering::SeqCst);
	}

	pub fn fail_writes(&self) {
		self.fail_writes.store(true, Ordering::SeqCst);
	}

	pub fn recorded_states(&self, order_id: &str) -> Vec<OrderState> {
		self.changes
			.lock()
			.iter()
			.filter(|(id, _)| id == order_id)
			.map(|(_, state)| *state)
			.collect()
	}

	pub fn sync_records(&self) -> Vec<SyncRecord> {
		self.syncs.lock().clone()
	}

	pub fn removals(&self) -> Vec<String> {
		self.removed.lock().clone()
	}

	fn check_write(&self) -> Result<(), StorageError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			Err(StorageError::Backend("write refused".into()))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl OrderPersistence for RecordingPersistence {
	async fn read_active_orders(&self, state: OrderState) -> Result<Vec<Order>, StorageError> {
		if self.fail_reads.load(Ordering::SeqCst) {
			return Err(StorageError::Backend("read refused".into()));
		}
		Ok(self
			.seeded
			.lock()
			.iter()
			.filter(|order| order.state == state)
			.cloned()
			.collect())
	}

	async fn record_state_change(
		&self,
		order: &Order,
		new_state: OrderState,
		_timestamp: u64,
	) -> Result<(), StorageError> {
		self.check_write()?;
		self.changes.lock().push((order.id.clone(), new_state));
		Ok(())
	}

	async fn record_sync_request(&self, record: &SyncRecord) -> Result<(), StorageError> {
		self.check_write()?;
		self.syncs.lock().push(record.clone());
		Ok(())
	}

	async fn record_removal(&self, order: &Order, _timestamp: u64) -> Result<(), StorageError> {
		self.check_write()?;
		self.removed.lock().push(order.id.clone());
		Ok(())
	}
}

/// Storage-backed gateway that holds audits of one state until released.
pub struct GatedPersistence {
	inner: StoragePersistence,
	gated: OrderState,
	entered: Notify,
	release: Semaphore,
}

impl GatedPersistence {
	pub fn new(gated: OrderState) -> Self {
		Self {
			inner: StoragePersistence::new(StorageService::new(Box::new(MemoryStorage::new()))),
			gated,
			entered: Notify::new(),
			release: Semaphore::new(0),
		}
	}

	pub fn inner(&self) -> &StoragePersistence {
		&self.inner
	}

	/// Resolves once an audit of the gated state is waiting.
	pub async fn held(&self) {
		self.entered.notified().await;
	}

	pub fn release(&self) {
		self.release.add_permits(1);
	}
}

#[async_trait]
impl OrderPersistence for GatedPersistence {
	async fn read_active_orders(&self, state: OrderState) -> Result<Vec<Order>, StorageError> {
		self.inner.read_active_orders(state).await
	}

	async fn record_state_change(
		&self,
		order: &Order,
		new_state: OrderState,
		timestamp: u64,
	) -> Result<(), StorageError> {
		if new_state == self.gated {
			self.entered.notify_one();
			let _permit = self
				.release
				.acquire()
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}
		self.inner.record_state_change(order, new_state, timestamp).await
	}

	async fn record_sync_request(&self, record: &SyncRecord) -> Result<(), StorageError> {
		self.inner.record_sync_request(record).await
	}

	async fn record_removal(&self, order: &Order, timestamp: u64) -> Result<(), StorageError> {
		self.inner.record_removal(order, timestamp).await
	}
}

/// Probe answering with a switchable fixed result.
pub struct FixedProbe {
	reachable: AtomicBool,
}

impl FixedProbe {
	pub fn new(reachable: bool) -> Self {
		Self {
			reachable: AtomicBool::new(reachable),
		}
	}

	pub fn set(&self, reachable: bool) {
		self.reachable.store(reachable, Ordering::SeqCst);
	}
}

#[async_trait]
impl ReachabilityProbe for FixedProbe {
	async fn is_reachable(&self, _instance: &Instance) -> bool {
		self.reachable.load(Ordering::SeqCst)
	}
}

/// Peer transport answering each request kind with a scripted response.
#[derive(Default)]
pub struct ScriptedPeer {
	responses: Mutex<HashMap<&'static str, FederationResponse>>,
	sent: Mutex<Vec<(String, FederationEnvelope)>>,
}

impl ScriptedPeer {
	pub fn respond(&self, kind: &'static str, response: FederationResponse) {
		self.responses.lock().insert(kind, response);
	}

	pub fn sent(&self) -> Vec<(String, FederationEnvelope)> {
		self.sent.lock().clone()
	}

	pub fn sent_kinds(&self) -> Vec<&'static str> {
		self.sent
			.lock()
			.iter()
			.map(|(_, envelope)| envelope.request.kind())
			.collect()
	}
}

#[async_trait]
impl PeerClient for ScriptedPeer {
	async fn send(
		&self,
		peer: &str,
		envelope: FederationEnvelope,
	) -> Result<FederationResponse, FederationError> {
		let kind = envelope.request.kind();
		self.sent.lock().push((peer.to_string(), envelope));
		self.responses
			.lock()
			.get(kind)
			.cloned()
			.ok_or_else(|| FederationError::Transport(format!("No response scripted for {}", kind)))
	}
}
