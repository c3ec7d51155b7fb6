//! Two-step deletion pipeline of local orders.
//!
//! ASSIGNED_FOR_DELETION releases the instance, CHECKING_DELETION waits
//! until the provider no longer knows it and then removes the order.
//! Failures keep the order in its state for the next pass.

use super::{PhaseProcessor, WorkerContext, WorkerError};
use crate::connector::ConnectorError;
use crate::registry::{CollectionKey, OrderHandle};
use async_trait::async_trait;
use broker_types::{truncate_id, Order, OrderState};
use std::sync::Arc;

pub struct AssignedForDeletionProcessor {
	context: Arc<WorkerContext>,
}

impl AssignedForDeletionProcessor {
	pub fn new(context: Arc<WorkerContext>) -> Self {
		Self { context }
	}
}

#[async_trait]
impl PhaseProcessor for AssignedForDeletionProcessor {
	fn name(&self) -> &'static str {
		"assigned_for_deletion"
	}

	fn source(&self) -> CollectionKey {
		CollectionKey::State(OrderState::AssignedForDeletion)
	}

	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError> {
		if order.instance_id.is_some() {
			let connector = self.context.connectors.connector_for(&order.target_provider)?;
			match connector.delete_instance(&order).await {
				Ok(()) => {},
				Err(ConnectorError::InstanceNotFound(_)) => {
					tracing::debug!(order_id = %truncate_id(&order.id), "Instance already gone");
				},
				Err(e) => return Err(e.into()),
			}
		}
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
}

pub struct CheckingDeletionProcessor {
	context: Arc<WorkerContext>,
}

impl CheckingDeletionProcessor {
	pub fn new(context: Arc<WorkerContext>) -> Self {
		Self { context }
	}
}

#[async_trait]
impl PhaseProcessor for CheckingDeletionProcessor {
	fn name(&self) -> &'static str {
		"checking_deletion"
	}

	fn source(&self) -> CollectionKey {
		CollectionKey::State(OrderState::CheckingDeletion)
	}

	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError> {
		let gone = match order.instance_id {
			None => true,
			Some(_) => {
				let connector = self.context.connectors.connector_for(&order.target_provider)?;
				match connector.get_instance(&order).await {
					Ok(instance) => {
						tracing::debug!(order_id = %truncate_id(&order.id), state = ?instance.state, "Instance still present");
						false
					},
					Err(ConnectorError::InstanceNotFound(_)) => true,
					Err(e) => return Err(e.into()),
				}
			},
		};
		if gone {
			self.context.transitioner.remove(handle).await?;
		}
		Ok(())
	}
}
