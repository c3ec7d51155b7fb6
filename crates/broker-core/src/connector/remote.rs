//! Connector for orders hosted by a federation peer.

use super::{CloudConnector, ConnectorError};
use async_trait::async_trait;
use broker_federation::{FederationClient, RemoteErrorKind};
use broker_types::{
	truncate_id, FederationUser, Image, ImageSummary, Instance, Order, Quota, ResourceType,
	SecurityRuleSpec,
};

/// Sends the federation request equivalent to each operation to one peer.
pub struct RemoteConnector {
	peer: String,
	client: FederationClient,
}

impl RemoteConnector {
	pub fn new(peer: impl Into<String>, client: FederationClient) -> Self {
		Self {
			peer: peer.into(),
			client,
		}
	}
}

#[async_trait]
impl CloudConnector for RemoteConnector {
	async fn request_instance(&self, order: &Order) -> Result<String, ConnectorError> {
		match self.client.create_order(&self.peer, order).await {
			Ok(order_id) => Ok(order_id),
			// A retried forward the peer already accepted.
			Err(e) if e.remote_kind() == Some(RemoteErrorKind::AlreadyExists) => {
				tracing::debug!(order_id = %truncate_id(&order.id), peer = %self.peer, "Order already known to peer");
				Ok(order.id.clone())
			},
			Err(e) => Err(e.into()),
		}
	}

	async fn get_instance(&self, order: &Order) -> Result<Instance, ConnectorError> {
		Ok(self.client.get_instance(&self.peer, &order.id).await?)
	}

	async fn delete_instance(&self, order: &Order) -> Result<(), ConnectorError> {
		Ok(self.client.delete_order(&self.peer, &order.id).await?)
	}

	async fn get_user_quota(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		resource_type: ResourceType,
	) -> Result<Quota, ConnectorError> {
		Ok(self
			.client
			.get_user_quota(&self.peer, user, cloud_name, resource_type)
			.await?)
	}

	async fn get_image(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		image_id: &str,
	) -> Result<Image, ConnectorError> {
		Ok(self
			.client
			.get_image(&self.peer, user, cloud_name, image_id)
			.await?)
	}

	async fn get_all_images(
		&self,
		user: &FederationUser,
		cloud_name: &str,
	) -> Result<Vec<ImageSummary>, ConnectorError> {
		Ok(self
			.client
			.get_all_images(&self.peer, user, cloud_name)
			.await?)
	}

	async fn create_security_rule(
		&self,
		major_order: &Order,
		rule: &SecurityRuleSpec,
	) -> Result<String, ConnectorError> {
		Ok(self
			.client
			.create_security_rule(&self.peer, &major_order.id, rule)
			.await?)
	}

	async fn delete_security_rule(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		rule_id: &str,
	) -> Result<(), ConnectorError> {
		Ok(self
			.client
			.delete_security_rule(&self.peer, user, cloud_name, rule_id)
			.await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{volume_order, ScriptedPeer};
	use broker_federation::{FederationRequest, FederationResponse};
	use std::sync::Arc;

	fn connector(kind: &'static str, response: FederationResponse) -> (RemoteConnector, Arc<ScriptedPeer>) {
		let peer = Arc::new(ScriptedPeer::default());
		peer.respond(kind, response);
		let client = FederationClient::new("site-a", peer.clone());
		(RemoteConnector::new("site-b", client), peer)
	}

	#[tokio::test]
	async fn test_request_forwards_create_order() {
		let order = volume_order("site-a", "site-b");
		let (connector, peer) = connector(
			"CREATE_ORDER",
			FederationResponse::OrderAccepted {
				order_id: order.id.clone(),
			},
		);

		assert_eq!(connector.request_instance(&order).await.unwrap(), order.id);
		let sent = peer.sent();
		assert_eq!(sent[0].0, "site-b");
		assert_eq!(sent[0].1.sender, "site-a");
		assert!(matches!(sent[0].1.request, FederationRequest::CreateOrder { .. }));
	}

	#[tokio::test]
	async fn test_already_accepted_forward_counts_as_success() {
		let order = volume_order("site-a", "site-b");
		let (connector, _) = connector(
			"CREATE_ORDER",
			FederationResponse::error(RemoteErrorKind::AlreadyExists, "known"),
		);
		assert_eq!(connector.request_instance(&order).await.unwrap(), order.id);
	}

	#[tokio::test]
	async fn test_remote_not_found_maps_to_instance_not_found() {
		let order = volume_order("site-a", "site-b");
		let (connector, _) = connector(
			"GET_INSTANCE",
			FederationResponse::error(RemoteErrorKind::InstanceNotFound, "no such order"),
		);
		assert!(matches!(
			connector.get_instance(&order).await,
			Err(ConnectorError::InstanceNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_transport_failure_is_unavailable_provider() {
		let order = volume_order("site-a", "site-b");
		let (connector, _) = connector("ACK", FederationResponse::Ack);
		assert!(matches!(
			connector.delete_instance(&order).await,
			Err(ConnectorError::UnavailableProvider(_))
		));
	}
}
