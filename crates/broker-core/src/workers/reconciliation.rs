//! Re-synchronizes local mirrors of orders hosted by peers.
//!
//! Events from the hosting peer are best effort, so the mirror is also
//! polled: live mirrors adopt the peer's view, deleting mirrors forward
//! the deletion and wait for the peer to forget the order.

use super::{PhaseProcessor, WorkerContext, WorkerError};
use crate::registry::{CollectionKey, OrderHandle};
use async_trait::async_trait;
use broker_federation::{FederationClient, RemoteErrorKind};
use broker_types::{current_timestamp, truncate_id, Order, OrderState, SyncOutcome, SyncRecord};
use std::sync::Arc;
use std::time::Duration;

pub struct ReconciliationProcessor {
	context: Arc<WorkerContext>,
	interval: Duration,
}

impl ReconciliationProcessor {
	pub fn new(context: Arc<WorkerContext>, interval: Duration) -> Self {
		Self { context, interval }
	}

	/// Mirror state matching the peer's state. `None` when the peer's state
	/// must not be copied.
	fn adopted_state(remote: OrderState) -> Option<OrderState> {
		match remote {
			OrderState::Open | OrderState::Pending => Some(OrderState::Pending),
			OrderState::AssignedForDeletion | OrderState::CheckingDeletion => None,
			state => Some(state),
		}
	}

	async fn record(&self, order: &Order, remote_state: Option<OrderState>, outcome: SyncOutcome) {
		let record = SyncRecord {
			order_id: order.id.clone(),
			peer: order.target_provider.clone(),
			local_state: order.state,
			remote_state,
			outcome,
			timestamp: current_timestamp(),
		};
		if let Err(e) = self.context.persistence.record_sync_request(&record).await {
			tracing::warn!(order_id = %truncate_id(&order.id), error = %e, "Failed to record sync request");
		}
	}

	async fn sync(
		&self,
		client: &FederationClient,
		handle: &OrderHandle,
		order: &Order,
	) -> Result<(), WorkerError> {
		let remote = match client.get_order(&order.target_provider, &order.id).await {
			Ok(remote) => remote,
			Err(e) if e.remote_kind() == Some(RemoteErrorKind::InstanceNotFound) => {
				self.record(order, None, SyncOutcome::Gone).await;
				let moved = self
					.context
					.transitioner
					.transition_if(
						handle,
						order.state,
						OrderState::FailedAfterSuccessfulRequest,
						|o| o.fault_message = Some("Order unknown to hosting peer".into()),
					)
					.await?;
				if moved.is_some() {
					tracing::warn!(order_id = %truncate_id(&order.id), peer = %order.target_provider, "Peer lost order");
				}
				return Ok(());
			},
			Err(e) => {
				self.record(order, None, SyncOutcome::Failed).await;
				return Err(e.into());
			},
		};

		let Some(adopted) = Self::adopted_state(remote.state) else {
			self.record(order, Some(remote.state), SyncOutcome::InSync).await;
			return Ok(());
		};
		let in_sync = adopted == order.state
			&& remote.instance_id == order.instance_id
			&& remote.cached_instance_state == order.cached_instance_state;
		if in_sync {
			self.record(order, Some(remote.state), SyncOutcome::InSync).await;
			return Ok(());
		}

		let instance_id = remote.instance_id.clone();
		let cached = remote.cached_instance_state;
		let fault = remote.fault_message.clone();
		let updated = self
			.context
			.transitioner
			.transition_if(handle, order.state, adopted, move |o| {
				o.instance_id = instance_id;
				o.cached_instance_state = cached;
				if fault.is_some() {
					o.fault_message = fault;
				}
			})
			.await?;

		if updated.is_some() {
			if adopted != order.state {
				tracing::info!(
					order_id = %truncate_id(&order.id),
					from = %order.state,
					to = %adopted,
					"Mirror corrected from peer"
				);
			}
			self.record(order, Some(remote.state), SyncOutcome::Updated).await;
		}
		Ok(())
	}

	async fn send_deletion(&self, client: &FederationClient, order: &Order) -> Result<(), WorkerError> {
		match client.delete_order(&order.target_provider, &order.id).await {
			Ok(()) => Ok(()),
			Err(e) if e.remote_kind() == Some(RemoteErrorKind::InstanceNotFound) => {
				tracing::debug!(order_id = %truncate_id(&order.id), "Peer does not know the order");
				Ok(())
			},
			Err(e) => Err(e.into()),
		}
	}

	async fn forward_deletion(
		&self,
		client: &FederationClient,
		handle: &OrderHandle,
		order: &Order,
	) -> Result<(), WorkerError> {
		self.send_deletion(client, order).await?;
		self.context
			.transitioner
			.transition_if(
				handle,
				OrderState::AssignedForDeletion,
				OrderState::CheckingDeletion,
				|_| {},
			)
			.await?;
		Ok(())
	}

	async fn confirm_deletion(
		&self,
		client: &FederationClient,
		handle: &OrderHandle,
		order: &Order,
	) -> Result<(), WorkerError> {
		match client.get_order(&order.target_provider, &order.id).await {
			Ok(remote) if remote.state.is_deleting() => {
				self.record(order, Some(remote.state), SyncOutcome::InSync).await;
				Ok(())
			},
			// The first DeleteOrder can overtake the CreateOrder still in
			// flight and find nothing; the peer then hosts a live order.
			Ok(remote) => {
				self.record(order, Some(remote.state), SyncOutcome::DeletionResent)
					.await;
				tracing::info!(
					order_id = %truncate_id(&order.id),
					peer = %order.target_provider,
					remote_state = %remote.state,
					"Peer still hosts deleted order, resending deletion"
				);
				self.send_deletion(client, order).await
			},
			Err(e) if e.remote_kind() == Some(RemoteErrorKind::InstanceNotFound) => {
				self.record(order, None, SyncOutcome::Gone).await;
				self.context.transitioner.remove(handle).await?;
				Ok(())
			},
			Err(e) => {
				self.record(order, None, SyncOutcome::Failed).await;
				Err(e.into())
			},
		}
	}
}

#[async_trait]
impl PhaseProcessor for ReconciliationProcessor {
	fn name(&self) -> &'static str {
		"reconciliation"
	}

	fn source(&self) -> CollectionKey {
		CollectionKey::Remote
	}

	/// Failed mirrors are left alone until deleted.
	fn accepts(&self, order: &Order) -> bool {
		!order.state.is_failure() && order.state != OrderState::Open
	}

	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError> {
		let client = self.context.federation()?;
		match order.state {
			OrderState::Pending | OrderState::Spawning | OrderState::Fulfilled => {
				self.sync(client, handle, &order).await
			},
			OrderState::AssignedForDeletion => self.forward_deletion(client, handle, &order).await,
			OrderState::CheckingDeletion => self.confirm_deletion(client, handle, &order).await,
			_ => Ok(()),
		}
	}

	fn sweep_pause(&self) -> Option<Duration> {
		Some(self.interval)
	}
}
