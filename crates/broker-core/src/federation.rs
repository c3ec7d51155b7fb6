//! Receiving side of the federation protocol.
//!
//! [`RemoteFacade`] translates authorized peer requests into the same
//! controller and transitioner calls local clients use. Requests scoped to
//! an order are only accepted from the provider that requested it, requests
//! scoped to a user only from the provider that authenticated the user, and
//! lifecycle events only from the provider hosting it.

use crate::controller::{ControllerError, OrderController};
use crate::registry::OrderRegistry;
use crate::state::OrderStateTransitioner;
use async_trait::async_trait;
use broker_federation::{
	FederationEnvelope, FederationEvent, FederationHandler, FederationRequest, FederationResponse,
	PeerAuthorizer, RemoteErrorKind,
};
use broker_types::{truncate_id, FederationUser, Order, OrderState};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
enum FacadeError {
	#[error("Authorization error: {0}")]
	Authorization(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("{0}")]
	Controller(#[from] ControllerError),
}

impl FacadeError {
	fn kind(&self) -> RemoteErrorKind {
		match self {
			Self::Authorization(_) => RemoteErrorKind::Authorization,
			Self::InvalidRequest(_) => RemoteErrorKind::InvalidRequest,
			Self::Controller(e) => match e {
				ControllerError::OrderNotFound(_) => RemoteErrorKind::InstanceNotFound,
				ControllerError::InvalidOrder(_) => RemoteErrorKind::InvalidRequest,
				ControllerError::AlreadyExists(_) => RemoteErrorKind::AlreadyExists,
				ControllerError::Connector(e) => e.remote_kind(),
				ControllerError::Transition(_) => RemoteErrorKind::Unexpected,
			},
		}
	}
}

pub struct RemoteFacade {
	registry: Arc<OrderRegistry>,
	transitioner: Arc<OrderStateTransitioner>,
	controller: Arc<OrderController>,
	authorizer: Arc<dyn PeerAuthorizer>,
}

impl RemoteFacade {
	pub fn new(
		registry: Arc<OrderRegistry>,
		transitioner: Arc<OrderStateTransitioner>,
		controller: Arc<OrderController>,
		authorizer: Arc<dyn PeerAuthorizer>,
	) -> Self {
		Self {
			registry,
			transitioner,
			controller,
			authorizer,
		}
	}

	fn local_provider(&self) -> &str {
		self.registry.local_provider()
	}

	/// Snapshot of an order the sender requested.
	fn owned_order(&self, sender: &str, order_id: &str) -> Result<Order, FacadeError> {
		let order = self.controller.get_order(order_id)?;
		if order.requesting_provider != sender {
			return Err(FacadeError::Authorization(format!(
				"Provider '{}' did not request order {}",
				sender, order_id
			)));
		}
		Ok(order)
	}

	fn check_user(&self, sender: &str, user: &FederationUser) -> Result<(), FacadeError> {
		if user.identity_provider != sender {
			return Err(FacadeError::Authorization(format!(
				"Provider '{}' cannot act for user {} of '{}'",
				sender, user.user_id, user.identity_provider
			)));
		}
		Ok(())
	}

	async fn dispatch(
		&self,
		sender: &str,
		request: FederationRequest,
	) -> Result<FederationResponse, FacadeError> {
		let local = self.local_provider().to_string();
		match request {
			FederationRequest::CreateOrder { order } => {
				if order.requesting_provider != sender {
					return Err(FacadeError::Authorization(format!(
						"Provider '{}' cannot submit orders on behalf of '{}'",
						sender, order.requesting_provider
					)));
				}
				if order.target_provider != local {
					return Err(FacadeError::InvalidRequest(format!(
						"Order {} targets '{}', not '{}'",
						order.id, order.target_provider, local
					)));
				}
				let order_id = self.controller.activate_order(order).await?;
				Ok(FederationResponse::OrderAccepted { order_id })
			},
			FederationRequest::DeleteOrder { order_id } => {
				self.owned_order(sender, &order_id)?;
				self.controller.delete_order(&order_id).await?;
				Ok(FederationResponse::Ack)
			},
			FederationRequest::GetOrder { order_id } => Ok(FederationResponse::Order {
				order: self.owned_order(sender, &order_id)?,
			}),
			FederationRequest::GetInstance { order_id } => {
				self.owned_order(sender, &order_id)?;
				let instance = self.controller.get_instance(&order_id).await?;
				Ok(FederationResponse::Instance { instance })
			},
			FederationRequest::GetUserQuota {
				user,
				cloud_name,
				resource_type,
			} => {
				self.check_user(sender, &user)?;
				let quota = self
					.controller
					.get_user_quota(&local, &cloud_name, &user, resource_type)
					.await?;
				Ok(FederationResponse::Quota { quota })
			},
			FederationRequest::GetImage {
				user,
				cloud_name,
				image_id,
			} => {
				self.check_user(sender, &user)?;
				let image = self
					.controller
					.get_image(&local, &cloud_name, &user, &image_id)
					.await?;
				Ok(FederationResponse::Image { image })
			},
			FederationRequest::GetAllImages { user, cloud_name } => {
				self.check_user(sender, &user)?;
				let images = self
					.controller
					.get_all_images(&local, &cloud_name, &user)
					.await?;
				Ok(FederationResponse::Images { images })
			},
			FederationRequest::CreateSecurityRule { order_id, rule } => {
				if rule.major_order_id != order_id {
					return Err(FacadeError::InvalidRequest(format!(
						"Rule belongs to {}, request names {}",
						rule.major_order_id, order_id
					)));
				}
				self.owned_order(sender, &order_id)?;
				let rule_id = self.controller.create_security_rule(&rule).await?;
				Ok(FederationResponse::SecurityRuleCreated { rule_id })
			},
			FederationRequest::DeleteSecurityRule {
				user,
				cloud_name,
				rule_id,
			} => {
				self.check_user(sender, &user)?;
				self.controller
					.delete_security_rule(&local, &cloud_name, &user, &rule_id)
					.await?;
				Ok(FederationResponse::Ack)
			},
			FederationRequest::NotifyEvent { event, order_id } => {
				self.apply_event(sender, event, &order_id).await?;
				Ok(FederationResponse::Ack)
			},
		}
	}

	/// Moves the local mirror to the state the hosting peer reported.
	async fn apply_event(
		&self,
		sender: &str,
		event: FederationEvent,
		order_id: &str,
	) -> Result<(), FacadeError> {
		let handle = self
			.registry
			.get(order_id)
			.ok_or_else(|| ControllerError::OrderNotFound(order_id.to_string()))?;
		let mirror = handle.snapshot();
		if mirror.target_provider != sender || mirror.requesting_provider != self.local_provider() {
			return Err(FacadeError::Authorization(format!(
				"Provider '{}' does not host order {}",
				sender, order_id
			)));
		}

		let target = match event {
			FederationEvent::InstanceFulfilled => OrderState::Fulfilled,
			FederationEvent::InstanceFailed => OrderState::FailedAfterSuccessfulRequest,
		};
		if mirror.state == target || mirror.state.is_deleting() {
			tracing::debug!(state = %mirror.state, event = ?event, "Event ignored");
			return Ok(());
		}

		let moved = self
			.transitioner
			.transition_if(&handle, mirror.state, target, move |o| {
				if target == OrderState::FailedAfterSuccessfulRequest {
					o.fault_message = Some(format!("Reported failed by '{}'", o.target_provider));
				}
			})
			.await
			.map_err(ControllerError::from)?;
		if moved.is_some() {
			tracing::info!(from = %mirror.state, to = %target, "Mirror updated from event");
		}
		Ok(())
	}
}

#[async_trait]
impl FederationHandler for RemoteFacade {
	#[instrument(skip_all, fields(
		sender = %envelope.sender,
		kind = envelope.request.kind(),
		order_id = %envelope.request.order_id().map(truncate_id).unwrap_or_default()
	))]
	async fn handle(&self, envelope: FederationEnvelope) -> FederationResponse {
		let FederationEnvelope { sender, request } = envelope;
		if let Err(e) = self.authorizer.authorize(&sender, &request) {
			tracing::warn!(error = %e, "Rejected federation request");
			return FederationResponse::error(RemoteErrorKind::Authorization, e.to_string());
		}

		match self.dispatch(&sender, request).await {
			Ok(response) => response,
			Err(e) => {
				let kind = e.kind();
				tracing::debug!(error = %e, kind = %kind, "Federation request failed");
				FederationResponse::error(kind, e.to_string())
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::connector::{CloudConnector, ConnectorFactory, MockCloudConnector};
	use crate::test_support::{volume_order, RecordingPersistence};
	use broker_federation::AllowListAuthorizer;

	fn facade(local: &str, trusted: &[&str]) -> (RemoteFacade, Arc<OrderController>) {
		let registry = Arc::new(OrderRegistry::new(local));
		let transitioner = Arc::new(OrderStateTransitioner::new(
			registry.clone(),
			Arc::new(RecordingPersistence::default()),
		));
		let cloud: Arc<dyn CloudConnector> = Arc::new(MockCloudConnector::new());
		let connectors = Arc::new(ConnectorFactory::new(local, cloud, None));
		let controller = Arc::new(OrderController::new(
			registry.clone(),
			transitioner.clone(),
			connectors,
		));
		let authorizer = Arc::new(AllowListAuthorizer::new(
			trusted.iter().map(|p| p.to_string()),
		));
		(
			RemoteFacade::new(registry, transitioner, controller.clone(), authorizer),
			controller,
		)
	}

	fn envelope(sender: &str, request: FederationRequest) -> FederationEnvelope {
		FederationEnvelope::new(sender, request)
	}

	fn error_kind(response: &FederationResponse) -> Option<RemoteErrorKind> {
		match response {
			FederationResponse::Error { error, .. } => Some(*error),
			_ => None,
		}
	}

	#[tokio::test]
	async fn test_create_order_normalizes_to_open() {
		let (facade, controller) = facade("site-b", &["site-a"]);
		let mut order = volume_order("site-a", "site-b");
		order.state = OrderState::Pending;

		let response = facade
			.handle(envelope("site-a", FederationRequest::CreateOrder {
				order: order.clone(),
			}))
			.await;
		assert_eq!(
			response,
			FederationResponse::OrderAccepted {
				order_id: order.id.clone()
			}
		);
		assert_eq!(controller.get_order(&order.id).unwrap().state, OrderState::Open);

		let again = facade
			.handle(envelope("site-a", FederationRequest::CreateOrder { order }))
			.await;
		assert_eq!(error_kind(&again), Some(RemoteErrorKind::AlreadyExists));
	}

	#[tokio::test]
	async fn test_untrusted_sender_is_rejected() {
		let (facade, _) = facade("site-b", &["site-a"]);
		let order = volume_order("site-x", "site-b");
		let response = facade
			.handle(envelope("site-x", FederationRequest::CreateOrder { order }))
			.await;
		assert_eq!(error_kind(&response), Some(RemoteErrorKind::Authorization));
	}

	#[tokio::test]
	async fn test_order_scoped_requests_require_requester() {
		let (facade, controller) = facade("site-b", &["site-a", "site-c"]);
		let order = volume_order("site-a", "site-b");
		controller.activate_order(order.clone()).await.unwrap();

		let foreign = facade
			.handle(envelope("site-c", FederationRequest::DeleteOrder {
				order_id: order.id.clone(),
			}))
			.await;
		assert_eq!(error_kind(&foreign), Some(RemoteErrorKind::Authorization));
		assert_eq!(controller.get_order(&order.id).unwrap().state, OrderState::Open);

		let forged = facade
			.handle(envelope("site-c", FederationRequest::CreateOrder {
				order: volume_order("site-a", "site-b"),
			}))
			.await;
		assert_eq!(error_kind(&forged), Some(RemoteErrorKind::Authorization));

		let owner = facade
			.handle(envelope("site-a", FederationRequest::DeleteOrder {
				order_id: order.id.clone(),
			}))
			.await;
		assert_eq!(owner, FederationResponse::Ack);
		assert_eq!(
			controller.get_order(&order.id).unwrap().state,
			OrderState::AssignedForDeletion
		);
	}

	#[tokio::test]
	async fn test_user_scoped_requests_require_identity_provider() {
		let (facade, _) = facade("site-b", &["site-a", "site-c"]);
		let user = crate::test_support::user();
		let requests = [
			FederationRequest::GetUserQuota {
				user: user.clone(),
				cloud_name: "default".into(),
				resource_type: broker_types::ResourceType::Compute,
			},
			FederationRequest::GetImage {
				user: user.clone(),
				cloud_name: "default".into(),
				image_id: "img-1".into(),
			},
			FederationRequest::GetAllImages {
				user: user.clone(),
				cloud_name: "default".into(),
			},
			FederationRequest::DeleteSecurityRule {
				user,
				cloud_name: "default".into(),
				rule_id: "rule-1".into(),
			},
		];

		for request in requests {
			let kind = request.kind();
			let response = facade.handle(envelope("site-c", request)).await;
			assert_eq!(
				error_kind(&response),
				Some(RemoteErrorKind::Authorization),
				"{} from a provider that did not authenticate the user",
				kind
			);
		}
	}

	#[tokio::test]
	async fn test_unknown_order_is_instance_not_found() {
		let (facade, _) = facade("site-b", &["site-a"]);
		let response = facade
			.handle(envelope("site-a", FederationRequest::GetOrder {
				order_id: "missing".into(),
			}))
			.await;
		assert_eq!(error_kind(&response), Some(RemoteErrorKind::InstanceNotFound));
	}

	#[tokio::test]
	async fn test_notify_event_requires_hosting_provider() {
		let (facade, controller) = facade("site-a", &["site-b", "site-c"]);
		let order = volume_order("site-a", "site-b");
		controller.activate_order(order.clone()).await.unwrap();

		let spoofed = facade
			.handle(envelope("site-c", FederationRequest::NotifyEvent {
				event: FederationEvent::InstanceFulfilled,
				order_id: order.id.clone(),
			}))
			.await;
		assert_eq!(error_kind(&spoofed), Some(RemoteErrorKind::Authorization));

		let failed = facade
			.handle(envelope("site-b", FederationRequest::NotifyEvent {
				event: FederationEvent::InstanceFailed,
				order_id: order.id.clone(),
			}))
			.await;
		assert_eq!(failed, FederationResponse::Ack);
		let mirror = controller.get_order(&order.id).unwrap();
		assert_eq!(mirror.state, OrderState::FailedAfterSuccessfulRequest);
		assert!(mirror.fault_message.unwrap().contains("site-b"));
	}
}
