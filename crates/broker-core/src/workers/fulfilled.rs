use super::{PhaseProcessor, WorkerContext, WorkerError};
use crate::registry::{CollectionKey, OrderHandle};
use async_trait::async_trait;
use broker_types::{truncate_id, Order, OrderState};
use std::sync::Arc;

/// Health check of fulfilled local orders.
pub struct FulfilledProcessor {
	context: Arc<WorkerContext>,
}

impl FulfilledProcessor {
	pub fn new(context: Arc<WorkerContext>) -> Self {
		Self { context }
	}
}

#[async_trait]
impl PhaseProcessor for FulfilledProcessor {
	fn name(&self) -> &'static str {
		"fulfilled"
	}

	fn source(&self) -> CollectionKey {
		CollectionKey::State(OrderState::Fulfilled)
	}

	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError> {
		let connector = self.context.connectors.connector_for(&order.target_provider)?;
		let instance = connector.get_instance(&order).await?;
		let observed = instance.state;

		if instance.has_failed() {
			if self
				.context
				.advance(
					handle,
					OrderState::Fulfilled,
					OrderState::FailedAfterSuccessfulRequest,
					move |o| {
						o.cached_instance_state = Some(observed);
						o.fault_message = Some("Instance failed after fulfillment".into());
					},
				)
				.await?
			{
				tracing::warn!(order_id = %truncate_id(&order.id), "Fulfilled instance failed");
			}
		} else if order.cached_instance_state != Some(observed) {
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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::connector::MockCloudConnector;
	use crate::test_support::volume_order;
	use crate::workers::tests::Harness;
	use broker_types::{Instance, InstanceState};
	use parking_lot::Mutex;

	#[tokio::test]
	async fn test_detects_failure_after_fulfillment() {
		let status = Arc::new(Mutex::new(InstanceState::Ready));
		let reported = status.clone();
		let mut cloud = MockCloudConnector::new();
		cloud
			.expect_get_instance()
			.returning(move |_| Ok(Instance::new("i-1", *reported.lock())));
		let harness = Harness::new(cloud);
		let handle = harness.activate(volume_order("site-a", "site-a")).await;
		harness
			.move_to(&handle, OrderState::Fulfilled, Some("i-1"))
			.await;

		let worker = harness.worker(FulfilledProcessor::new(harness.context.clone()));
		worker.poll_once().await.unwrap();
		assert_eq!(handle.snapshot().state, OrderState::Fulfilled);

		*status.lock() = InstanceState::Failed;
		worker.poll_once().await.unwrap();
		worker.poll_once().await.unwrap();

		let order = handle.snapshot();
		assert_eq!(order.state, OrderState::FailedAfterSuccessfulRequest);
		assert_eq!(order.cached_instance_state, Some(InstanceState::Failed));
	}
}
