use super::{PhaseProcessor, WorkerContext, WorkerError};
use crate::registry::{CollectionKey, OrderHandle};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_types::{truncate_id, Order, OrderState};
use std::sync::Arc;

/// Requests the resource of OPEN orders from their target provider.
///
/// Local orders move to SPAWNING with their instance id, forwarded orders
/// to PENDING.
pub struct OpenProcessor {
	context: Arc<WorkerContext>,
}

impl OpenProcessor {
	pub fn new(context: Arc<WorkerContext>) -> Self {
		Self { context }
	}

	/// The order left OPEN while the request ran, most likely because it was
	/// deleted. The instance id is kept so the deletion pipeline releases it;
	/// if the order is already gone the instance is released here.
	async fn keep_raced_instance(
		&self,
		handle: &OrderHandle,
		mut order: Order,
		instance_id: String,
	) -> Result<(), WorkerError> {
		let recorded = instance_id.clone();
		let result = self
			.context
			.transitioner
			.update(handle, move |o| {
				if o.instance_id.is_none() {
					o.instance_id = Some(recorded);
				}
			})
			.await;

		match result {
			Ok(_) => {
				tracing::info!(instance_id = %instance_id, "Order left OPEN during request, instance recorded");
				Ok(())
			},
			Err(TransitionError::NotInCollection { .. }) => {
				tracing::info!(instance_id = %instance_id, "Order removed during request, releasing instance");
				order.instance_id = Some(instance_id);
				let connector = self.context.connectors.connector_for(&order.target_provider)?;
				connector.delete_instance(&order).await?;
				Ok(())
			},
			Err(e) => Err(e.into()),
		}
	}
}

#[async_trait]
impl PhaseProcessor for OpenProcessor {
	fn name(&self) -> &'static str {
		"open"
	}

	fn source(&self) -> CollectionKey {
		CollectionKey::State(OrderState::Open)
	}

	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError> {
		let connector = self.context.connectors.connector_for(&order.target_provider)?;
		let requested = connector.request_instance(&order).await?;
		let local = order.is_provider_local(self.context.local_provider());

		let (next, instance_id) = if local {
			(OrderState::Spawning, Some(requested.clone()))
		} else {
			(OrderState::Pending, None)
		};
		let moved = self
			.context
			.advance(handle, OrderState::Open, next, move |o| {
				if let Some(id) = instance_id {
					o.instance_id = Some(id);
				}
			})
			.await?;

		if moved {
			tracing::info!(
				order_id = %truncate_id(&order.id),
				state = %next,
				target = %order.target_provider,
				"Order requested"
			);
			Ok(())
		} else if local {
			self.keep_raced_instance(handle, order, requested).await
		} else {
			Ok(())
		}
	}

	fn failure_state(&self) -> Option<OrderState> {
		Some(OrderState::FailedOnRequest)
	}
}
