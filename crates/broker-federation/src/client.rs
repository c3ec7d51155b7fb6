//! Typed request helpers on top of a [`PeerClient`].

use crate::{
	FederationEnvelope, FederationError, FederationEvent, FederationRequest, FederationResponse,
	PeerClient,
};
use broker_types::{
	FederationUser, Image, ImageSummary, Instance, Order, Quota, ResourceType, SecurityRuleSpec,
};
use std::sync::Arc;

/// Sends federation requests on behalf of the local provider.
#[derive(Clone)]
pub struct FederationClient {
	local_provider: String,
	transport: Arc<dyn PeerClient>,
}

impl FederationClient {
	pub fn new(local_provider: impl Into<String>, transport: Arc<dyn PeerClient>) -> Self {
		Self {
			local_provider: local_provider.into(),
			transport,
		}
	}

	pub fn local_provider(&self) -> &str {
		&self.local_provider
	}

	async fn call(
		&self,
		peer: &str,
		request: FederationRequest,
	) -> Result<FederationResponse, FederationError> {
		let kind = request.kind();
		tracing::debug!(peer = %peer, kind, "Sending federation request");

		let envelope = FederationEnvelope::new(self.local_provider.clone(), request);
		match self.transport.send(peer, envelope).await? {
			FederationResponse::Error { error, message } => {
				Err(FederationError::Remote { kind: error, message })
			},
			response => Ok(response),
		}
	}

	fn unexpected(expected: &str, response: FederationResponse) -> FederationError {
		FederationError::Codec(format!(
			"Expected {} response, got {:?}",
			expected, response
		))
	}

	/// Forwards an order to the peer hosting it; returns the accepted id.
	pub async fn create_order(&self, peer: &str, order: &Order) -> Result<String, FederationError> {
		match self
			.call(peer, FederationRequest::CreateOrder {
				order: order.clone(),
			})
			.await?
		{
			FederationResponse::OrderAccepted { order_id } => Ok(order_id),
			other => Err(Self::unexpected("ORDER_ACCEPTED", other)),
		}
	}

	pub async fn delete_order(&self, peer: &str, order_id: &str) -> Result<(), FederationError> {
		match self
			.call(peer, FederationRequest::DeleteOrder {
				order_id: order_id.to_string(),
			})
			.await?
		{
			FederationResponse::Ack => Ok(()),
			other => Err(Self::unexpected("ACK", other)),
		}
	}

	pub async fn get_order(&self, peer: &str, order_id: &str) -> Result<Order, FederationError> {
		match self
			.call(peer, FederationRequest::GetOrder {
				order_id: order_id.to_string(),
			})
			.await?
		{
			FederationResponse::Order { order } => Ok(order),
			other => Err(Self::unexpected("ORDER", other)),
		}
	}

	pub async fn get_instance(&self, peer: &str, order_id: &str) -> Result<Instance, FederationError> {
		match self
			.call(peer, FederationRequest::GetInstance {
				order_id: order_id.to_string(),
			})
			.await?
		{
			FederationResponse::Instance { instance } => Ok(instance),
			other => Err(Self::unexpected("INSTANCE", other)),
		}
	}

	pub async fn get_user_quota(
		&self,
		peer: &str,
		user: &FederationUser,
		cloud_name: &str,
		resource_type: ResourceType,
	) -> Result<Quota, FederationError> {
		match self
			.call(peer, FederationRequest::GetUserQuota {
				user: user.clone(),
				cloud_name: cloud_name.to_string(),
				resource_type,
			})
			.await?
		{
			FederationResponse::Quota { quota } => Ok(quota),
			other => Err(Self::unexpected("QUOTA", other)),
		}
	}

	pub async fn get_image(
		&self,
		peer: &str,
		user: &FederationUser,
		cloud_name: &str,
		image_id: &str,
	) -> Result<Image, FederationError> {
		match self
			.call(peer, FederationRequest::GetImage {
				user: user.clone(),
				cloud_name: cloud_name.to_string(),
				image_id: image_id.to_string(),
			})
			.await?
		{
			FederationResponse::Image { image } => Ok(image),
			other => Err(Self::unexpected("IMAGE", other)),
		}
	}

	pub async fn get_all_images(
		&self,
		peer: &str,
		user: &FederationUser,
		cloud_name: &str,
	) -> Result<Vec<ImageSummary>, FederationError> {
		match self
			.call(peer, FederationRequest::GetAllImages {
				user: user.clone(),
				cloud_name: cloud_name.to_string(),
			})
			.await?
		{
			FederationResponse::Images { images } => Ok(images),
			other => Err(Self::unexpected("IMAGES", other)),
		}
	}

	pub async fn create_security_rule(
		&self,
		peer: &str,
		order_id: &str,
		rule: &SecurityRuleSpec,
	) -> Result<String, FederationError> {
		match self
			.call(peer, FederationRequest::CreateSecurityRule {
				order_id: order_id.to_string(),
				rule: rule.clone(),
			})
			.await?
		{
			FederationResponse::SecurityRuleCreated { rule_id } => Ok(rule_id),
			other => Err(Self::unexpected("SECURITY_RULE_CREATED", other)),
		}
	}

	pub async fn delete_security_rule(
		&self,
		peer: &str,
		user: &FederationUser,
		cloud_name: &str,
		rule_id: &str,
	) -> Result<(), FederationError> {
		match self
			.call(peer, FederationRequest::DeleteSecurityRule {
				user: user.clone(),
				cloud_name: cloud_name.to_string(),
				rule_id: rule_id.to_string(),
			})
			.await?
		{
			FederationResponse::Ack => Ok(()),
			other => Err(Self::unexpected("ACK", other)),
		}
	}

	/// One-shot lifecycle notification, no retry.
	pub async fn notify_event(
		&self,
		peer: &str,
		event: FederationEvent,
		order_id: &str,
	) -> Result<(), FederationError> {
		match self
			.call(peer, FederationRequest::NotifyEvent {
				event,
				order_id: order_id.to_string(),
			})
			.await?
		{
			FederationResponse::Ack => Ok(()),
			other => Err(Self::unexpected("ACK", other)),
		}
	}
}
