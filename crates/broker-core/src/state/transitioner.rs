//! The single writer of `Order::state`.
//!
//! Every transition runs one synchronous critical section: lock the order,
//! resolve origin and destination collections, lock both in key order,
//! move the handle, update the order, bump its version, release. The audit
//! record is written through the persistence gateway after all locks are
//! gone, so audits of one order may reach the gateway out of order; the
//! version lets the gateway keep the newest snapshot. A failing gateway is
//! logged and does not undo the transition.

use crate::registry::{CollectionKey, OrderHandle, OrderRegistry, RegistryError};
use broker_storage::OrderPersistence;
use broker_types::{current_timestamp, truncate_id, Order, OrderState};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during state transitions.
#[derive(Debug, Error)]
pub enum TransitionError {
	/// Origin or destination collection is not configured. The order is
	/// left untouched.
	#[error("Orders list not found: {0}")]
	OrdersListNotFound(CollectionKey),
	/// The order is no longer in the collection its state routes to,
	/// usually because it was removed concurrently.
	#[error("Order {order_id} not in collection {key}")]
	NotInCollection { order_id: String, key: CollectionKey },
	/// Only OPEN orders can be activated.
	#[error("Order {0} is not OPEN")]
	NotOpen(String),
	/// The order left the state a conditional transition expected.
	#[error("Order {order_id} is {actual}, expected {expected}")]
	StateChanged {
		order_id: String,
		expected: OrderState,
		actual: OrderState,
	},
	#[error("Registry error: {0}")]
	Registry(#[from] RegistryError),
}

pub struct OrderStateTransitioner {
	registry: Arc<OrderRegistry>,
	persistence: Arc<dyn OrderPersistence>,
}

impl OrderStateTransitioner {
	pub fn new(registry: Arc<OrderRegistry>, persistence: Arc<dyn OrderPersistence>) -> Self {
		Self {
			registry,
			persistence,
		}
	}

	pub fn registry(&self) -> &Arc<OrderRegistry> {
		&self.registry
	}

	/// Moves the order to `new_state`.
	pub async fn transition(
		&self,
		handle: &OrderHandle,
		new_state: OrderState,
	) -> Result<Order, TransitionError> {
		self.transition_with(handle, new_state, |_| {}).await
	}

	/// Moves the order to `new_state`, applying `update` in the same
	/// critical section.
	pub async fn transition_with<F>(
		&self,
		handle: &OrderHandle,
		new_state: OrderState,
		update: F,
	) -> Result<Order, TransitionError>
	where
		F: FnOnce(&mut Order) + Send,
	{
		let (from, order) = self.apply(handle, None, Some(new_state), update)?;
		self.audit(&order, from).await;
		Ok(order)
	}

	/// Like [`Self::transition_with`] but only if the order is still in
	/// `expected`. Returns `None` when the order moved on in the meantime.
	pub async fn transition_if<F>(
		&self,
		handle: &OrderHandle,
		expected: OrderState,
		new_state: OrderState,
		update: F,
	) -> Result<Option<Order>, TransitionError>
	where
		F: FnOnce(&mut Order) + Send,
	{
		match self.apply(handle, Some(expected), Some(new_state), update) {
			Ok((from, order)) => {
				self.audit(&order, from).await;
				Ok(Some(order))
			},
			Err(TransitionError::StateChanged { .. }) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Updates fields without changing the state.
	pub async fn update<F>(&self, handle: &OrderHandle, update: F) -> Result<Order, TransitionError>
	where
		F: FnOnce(&mut Order) + Send,
	{
		let (from, order) = self.apply(handle, None, None, update)?;
		self.audit(&order, from).await;
		Ok(order)
	}

	/// Admits a brand-new OPEN order.
	pub async fn activate(&self, order: Order) -> Result<Arc<OrderHandle>, TransitionError> {
		if order.state != OrderState::Open {
			return Err(TransitionError::NotOpen(order.id));
		}
		let handle = match self.registry.insert(order) {
			Ok(handle) => handle,
			Err(RegistryError::CollectionNotFound(key)) => {
				return Err(TransitionError::OrdersListNotFound(key))
			},
			Err(e) => return Err(e.into()),
		};

		let snapshot = handle.snapshot();
		if let Err(e) = self
			.persistence
			.record_state_change(&snapshot, snapshot.state, snapshot.updated_at)
			.await
		{
			tracing::warn!(order_id = %truncate_id(&snapshot.id), error = %e, "Failed to record activation");
		}
		Ok(handle)
	}

	/// Terminal removal at the end of the deletion pipeline.
	pub async fn remove(&self, handle: &OrderHandle) -> Result<Option<Order>, TransitionError> {
		let removed = match self.registry.remove_order(handle.id()) {
			Ok(removed) => removed,
			Err(RegistryError::CollectionNotFound(key)) => {
				return Err(TransitionError::OrdersListNotFound(key))
			},
			Err(e) => return Err(e.into()),
		};

		if let Some(order) = &removed {
			tracing::info!(order_id = %truncate_id(handle.id()), "Order removed");
			if let Err(e) = self
				.persistence
				.record_removal(order, current_timestamp())
				.await
			{
				tracing::warn!(order_id = %truncate_id(handle.id()), error = %e, "Failed to record removal");
			}
		}
		Ok(removed)
	}

	/// Synchronous critical section. Returns the previous state and the
	/// order after the change.
	fn apply<F>(
		&self,
		handle: &OrderHandle,
		expected: Option<OrderState>,
		new_state: Option<OrderState>,
		update: F,
	) -> Result<(OrderState, Order), TransitionError>
	where
		F: FnOnce(&mut Order),
	{
		let mut order = handle.lock();
		let from = order.state;
		if let Some(expected) = expected.filter(|state| *state != from) {
			return Err(TransitionError::StateChanged {
				order_id: order.id.clone(),
				expected,
				actual: from,
			});
		}
		let to = new_state.unwrap_or(from);

		let origin_key = self.registry.collection_key_for(&order, from);
		let destination_key = self.registry.collection_key_for(&order, to);
		let origin = self
			.registry
			.collection(origin_key)
			.map_err(|_| TransitionError::OrdersListNotFound(origin_key))?;
		let destination = self
			.registry
			.collection(destination_key)
			.map_err(|_| TransitionError::OrdersListNotFound(destination_key))?;

		if origin_key == destination_key {
			let entries = origin.lock();
			if !entries.contains(handle.id()) {
				return Err(TransitionError::NotInCollection {
					order_id: handle.id().to_string(),
					key: origin_key,
				});
			}
			update(&mut *order);
			order.state = to;
			order.updated_at = current_timestamp();
			order.version += 1;
			drop(entries);
		} else {
			let (mut origin_entries, mut destination_entries) = if origin_key < destination_key {
				let o = origin.lock();
				let d = destination.lock();
				(o, d)
			} else {
				let d = destination.lock();
				let o = origin.lock();
				(o, d)
			};

			let moved = origin_entries.remove(handle.id()).ok_or_else(|| {
				TransitionError::NotInCollection {
					order_id: handle.id().to_string(),
					key: origin_key,
				}
			})?;
			update(&mut *order);
			order.state = to;
			order.updated_at = current_timestamp();
			order.version += 1;
			destination_entries.add(moved);
		}

		if from != to {
			tracing::debug!(
				order_id = %truncate_id(&order.id),
				from = %from,
				to = %to,
				"Order state changed"
			);
		}
		Ok((from, order.clone()))
	}

	async fn audit(&self, order: &Order, from: OrderState) {
		if let Err(e) = self
			.persistence
			.record_state_change(order, order.state, order.updated_at)
			.await
		{
			tracing::warn!(
				order_id = %truncate_id(&order.id),
				from = %from,
				to = %order.state,
				error = %e,
				"Failed to record state change"
			);
		}
	}
}
