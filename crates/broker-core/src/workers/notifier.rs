//! Lifecycle notifications sent back to the requesting provider.

use broker_federation::{FederationClient, FederationEvent};
use broker_types::{truncate_id, Order, OrderState};

/// Reports FULFILLED and failure transitions of orders hosted here on
/// behalf of a peer. Delivery is best effort; the peer's reconciliation
/// catches up on lost events.
pub struct EventNotifier {
	local_provider: String,
	client: Option<FederationClient>,
}

impl EventNotifier {
	pub fn new(local_provider: impl Into<String>, client: Option<FederationClient>) -> Self {
		Self {
			local_provider: local_provider.into(),
			client,
		}
	}

	/// Event announcing that an order reached `state`, if any.
	pub fn event_for(state: OrderState) -> Option<FederationEvent> {
		match state {
			OrderState::Fulfilled => Some(FederationEvent::InstanceFulfilled),
			state if state.is_failure() => Some(FederationEvent::InstanceFailed),
			_ => None,
		}
	}

	/// Sends the event matching the order's current state to its requester.
	pub async fn notify(&self, order: &Order) {
		if !order.is_provider_local(&self.local_provider)
			|| !order.is_requester_remote(&self.local_provider)
		{
			return;
		}
		let Some(event) = Self::event_for(order.state) else {
			return;
		};
		let Some(client) = &self.client else {
			tracing::warn!(
				order_id = %truncate_id(&order.id),
				requester = %order.requesting_provider,
				"No federation client, event dropped"
			);
			return;
		};

		match client
			.notify_event(&order.requesting_provider, event, &order.id)
			.await
		{
			Ok(()) => {
				tracing::debug!(order_id = %truncate_id(&order.id), event = ?event, "Event delivered");
			},
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					requester = %order.requesting_provider,
					error = %e,
					"Failed to deliver event"
				);
			},
		}
	}
}
