//! Per-state order collections with a traversal cursor.

use broker_types::{Order, OrderState};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Identifies one collection of the registry.
///
/// Ordering defines the global lock order used when two collections are
/// locked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionKey {
	State(OrderState),
	/// Non-OPEN orders hosted by a peer.
	Remote,
}

impl CollectionKey {
	/// Every collection a complete registry holds.
	pub fn all() -> impl Iterator<Item = Self> {
		OrderState::all()
			.map(CollectionKey::State)
			.chain(std::iter::once(CollectionKey::Remote))
	}
}

impl fmt::Display for CollectionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::State(state) => write!(f, "{}", state),
			Self::Remote => f.write_str("REMOTE"),
		}
	}
}

impl From<OrderState> for CollectionKey {
	fn from(state: OrderState) -> Self {
		CollectionKey::State(state)
	}
}

/// Shared handle to one live order.
///
/// The order lock protects every field including `state`; it is never held
/// across an `.await`.
#[derive(Debug)]
pub struct OrderHandle {
	id: String,
	inner: Mutex<Order>,
}

impl OrderHandle {
	pub fn new(order: Order) -> Self {
		Self {
			id: order.id.clone(),
			inner: Mutex::new(order),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn lock(&self) -> MutexGuard<'_, Order> {
		self.inner.lock()
	}

	/// Copy of the order taken under its lock.
	pub fn snapshot(&self) -> Order {
		self.inner.lock().clone()
	}
}

/// Orders of one collection plus the cursor used by its worker.
#[derive(Debug, Default)]
pub struct CollectionEntries {
	orders: Vec<Arc<OrderHandle>>,
	cursor: usize,
}

impl CollectionEntries {
	/// Appends at the tail.
	pub fn add(&mut self, handle: Arc<OrderHandle>) {
		self.orders.push(handle);
	}

	/// Removes by id. An element removed before the cursor pulls the cursor
	/// back by one so the element that slid into its place is not skipped.
	pub fn remove(&mut self, order_id: &str) -> Option<Arc<OrderHandle>> {
		let index = self.orders.iter().position(|h| h.id() == order_id)?;
		let handle = self.orders.remove(index);
		if index < self.cursor {
			self.cursor -= 1;
		}
		Some(handle)
	}

	pub fn contains(&self, order_id: &str) -> bool {
		self.orders.iter().any(|h| h.id() == order_id)
	}

	pub fn len(&self) -> usize {
		self.orders.len()
	}

	pub fn is_empty(&self) -> bool {
		self.orders.is_empty()
	}

	fn next(&mut self) -> Option<Arc<OrderHandle>> {
		let handle = self.orders.get(self.cursor).cloned()?;
		self.cursor += 1;
		Some(handle)
	}

	fn ids(&self) -> Vec<String> {
		self.orders.iter().map(|h| h.id().to_string()).collect()
	}
}

/// One lock-protected collection of the registry.
#[derive(Debug)]
pub struct OrderCollection {
	key: CollectionKey,
	entries: Mutex<CollectionEntries>,
}

impl OrderCollection {
	pub fn new(key: CollectionKey) -> Self {
		Self {
			key,
			entries: Mutex::new(CollectionEntries::default()),
		}
	}

	pub fn key(&self) -> CollectionKey {
		self.key
	}

	/// Locks the collection for a multi-step change.
	pub(crate) fn lock(&self) -> MutexGuard<'_, CollectionEntries> {
		self.entries.lock()
	}

	pub fn add(&self, handle: Arc<OrderHandle>) {
		self.entries.lock().add(handle);
	}

	pub fn remove(&self, order_id: &str) -> Option<Arc<OrderHandle>> {
		self.entries.lock().remove(order_id)
	}

	pub fn contains(&self, order_id: &str) -> bool {
		self.entries.lock().contains(order_id)
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Element at the cursor, advancing it. `None` once the sweep is done.
	pub fn next(&self) -> Option<Arc<OrderHandle>> {
		self.entries.lock().next()
	}

	/// Rewinds the cursor to the head.
	pub fn reset(&self) {
		self.entries.lock().cursor = 0;
	}

	/// Ids currently in the collection, in traversal order.
	pub fn snapshot(&self) -> Vec<String> {
		self.entries.lock().ids()
	}
}
