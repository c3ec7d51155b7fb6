use super::{PhaseProcessor, WorkerContext, WorkerError};
use crate::registry::{CollectionKey, OrderHandle};
use async_trait::async_trait;
use broker_types::{truncate_id, Order, OrderState};
use std::sync::Arc;

/// Waits for the instance of a SPAWNING order to become usable.
pub struct SpawningProcessor {
	context: Arc<WorkerContext>,
}

impl SpawningProcessor {
	pub fn new(context: Arc<WorkerContext>) -> Self {
		Self { context }
	}
}

#[async_trait]
impl PhaseProcessor for SpawningProcessor {
	fn name(&self) -> &'static str {
		"spawning"
	}

	fn source(&self) -> CollectionKey {
		CollectionKey::State(OrderState::Spawning)
	}

	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError> {
		let connector = self.context.connectors.connector_for(&order.target_provider)?;
		let instance = connector.get_instance(&order).await?;
		let observed = instance.state;

		if instance.has_failed() {
			self.context
				.advance(
					handle,
					OrderState::Spawning,
					OrderState::FailedAfterSuccessfulRequest,
					move |o| {
						o.cached_instance_state = Some(observed);
						o.fault_message = Some("Instance failed while spawning".into());
					},
				)
				.await?;
			return Ok(());
		}

		if instance.is_ready() {
			if order.resource_type().requires_reachability_check()
				&& !self.context.probe.is_reachable(&instance).await
			{
				tracing::debug!(order_id = %truncate_id(&order.id), "Instance ready but not reachable yet");
				return Ok(());
			}
			if self
				.context
				.advance(handle, OrderState::Spawning, OrderState::Fulfilled, move |o| {
					o.cached_instance_state = Some(observed)
				})
				.await?
			{
				tracing::info!(order_id = %truncate_id(&order.id), "Order fulfilled");
			}
			return Ok(());
		}

		if order.cached_instance_state != Some(observed) {
			self.context
				.transitioner
				.update(handle, move |o| o.cached_instance_state = Some(observed))
				.await?;
		}
		Ok(())
	}

	fn failure_state(&self) -> Option<OrderState> {
		Some(OrderState::UnableToCheckStatus)
	}
}
