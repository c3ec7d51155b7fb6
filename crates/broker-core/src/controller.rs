//! Admission-facing operations on orders.
//!
//! The controller is what a client edge or the federation facade calls:
//! it admits new orders, schedules deletions and answers queries. Queries
//! about resources go to the connector of the provider hosting them.

use crate::connector::{ConnectorError, ConnectorFactory};
use crate::registry::{OrderHandle, OrderRegistry, RegistryError};
use crate::state::{OrderStateTransitioner, TransitionError};
use broker_types::{
	truncate_id, FederationUser, Image, ImageSummary, Instance, Order, OrderPayload, OrderState,
	Quota, ResourceType, SecurityRuleSpec,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Invalid order: {0}")]
	InvalidOrder(String),
	#[error("Order already exists: {0}")]
	AlreadyExists(String),
	#[error("Connector error: {0}")]
	Connector(#[from] ConnectorError),
	#[error("Transition error: {0}")]
	Transition(TransitionError),
}

impl From<TransitionError> for ControllerError {
	fn from(err: TransitionError) -> Self {
		match err {
			TransitionError::Registry(RegistryError::DuplicateOrder(id)) => Self::AlreadyExists(id),
			other => Self::Transition(other),
		}
	}
}

pub struct OrderController {
	registry: Arc<OrderRegistry>,
	transitioner: Arc<OrderStateTransitioner>,
	connectors: Arc<ConnectorFactory>,
}

impl OrderController {
	pub fn new(
		registry: Arc<OrderRegistry>,
		transitioner: Arc<OrderStateTransitioner>,
		connectors: Arc<ConnectorFactory>,
	) -> Self {
		Self {
			registry,
			transitioner,
			connectors,
		}
	}

	fn handle(&self, order_id: &str) -> Result<Arc<OrderHandle>, ControllerError> {
		self.registry
			.get(order_id)
			.ok_or_else(|| ControllerError::OrderNotFound(order_id.to_string()))
	}

	/// Admits an order in OPEN and returns its id.
	///
	/// Lifecycle fields of the submitted order are reset; an empty target
	/// provider means the local provider.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id)))]
	pub async fn activate_order(&self, mut order: Order) -> Result<String, ControllerError> {
		if order.id.is_empty() {
			return Err(ControllerError::InvalidOrder("Order id is empty".into()));
		}
		if order.requesting_provider.is_empty() {
			return Err(ControllerError::InvalidOrder(
				"Requesting provider is empty".into(),
			));
		}
		if order.target_provider.is_empty() {
			order.target_provider = self.registry.local_provider().to_string();
		}
		order.state = OrderState::Open;
		order.instance_id = None;
		order.cached_instance_state = None;
		order.fault_message = None;
		order.version = 0;

		let handle = self.transitioner.activate(order).await?;
		tracing::info!(
			resource_type = %handle.snapshot().resource_type(),
			"Order activated"
		);
		Ok(handle.id().to_string())
	}

	/// Schedules the order for deletion. Deleting an order that is already
	/// in the deletion pipeline succeeds without a change.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn delete_order(&self, order_id: &str) -> Result<(), ControllerError> {
		let handle = self.handle(order_id)?;
		loop {
			let current = handle.snapshot().state;
			if current.is_deleting() {
				return Ok(());
			}
			if self
				.transitioner
				.transition_if(&handle, current, OrderState::AssignedForDeletion, |_| {})
				.await?
				.is_some()
			{
				tracing::info!(from = %current, "Order assigned for deletion");
				return Ok(());
			}
		}
	}

	pub fn get_order(&self, order_id: &str) -> Result<Order, ControllerError> {
		Ok(self.handle(order_id)?.snapshot())
	}

	/// Current provider-side view of the order's resource.
	pub async fn get_instance(&self, order_id: &str) -> Result<Instance, ControllerError> {
		let order = self.get_order(order_id)?;
		if order.is_provider_local(self.registry.local_provider()) && order.instance_id.is_none() {
			return Err(ConnectorError::InstanceNotFound(format!(
				"Order {} has no instance yet",
				order_id
			))
			.into());
		}
		let connector = self.connectors.connector_for(&order.target_provider)?;
		Ok(connector.get_instance(&order).await?)
	}

	pub async fn get_user_quota(
		&self,
		provider: &str,
		cloud_name: &str,
		user: &FederationUser,
		resource_type: ResourceType,
	) -> Result<Quota, ControllerError> {
		let connector = self.connectors.connector_for(provider)?;
		Ok(connector
			.get_user_quota(user, cloud_name, resource_type)
			.await?)
	}

	pub async fn get_image(
		&self,
		provider: &str,
		cloud_name: &str,
		user: &FederationUser,
		image_id: &str,
	) -> Result<Image, ControllerError> {
		let connector = self.connectors.connector_for(provider)?;
		Ok(connector.get_image(user, cloud_name, image_id).await?)
	}

	pub async fn get_all_images(
		&self,
		provider: &str,
		cloud_name: &str,
		user: &FederationUser,
	) -> Result<Vec<ImageSummary>, ControllerError> {
		let connector = self.connectors.connector_for(provider)?;
		Ok(connector.get_all_images(user, cloud_name).await?)
	}

	/// Creates a rule on the network or public IP order it names.
	pub async fn create_security_rule(&self, rule: &SecurityRuleSpec) -> Result<String, ControllerError> {
		let major = self.get_order(&rule.major_order_id)?;
		if !matches!(
			major.payload,
			OrderPayload::Network(_) | OrderPayload::PublicIp(_)
		) {
			return Err(ControllerError::InvalidOrder(format!(
				"Security rules attach to network or public IP orders, {} is {}",
				major.id,
				major.resource_type()
			)));
		}
		let connector = self.connectors.connector_for(&major.target_provider)?;
		Ok(connector.create_security_rule(&major, rule).await?)
	}

	pub async fn delete_security_rule(
		&self,
		provider: &str,
		cloud_name: &str,
		user: &FederationUser,
		rule_id: &str,
	) -> Result<(), ControllerError> {
		let connector = self.connectors.connector_for(provider)?;
		Ok(connector
			.delete_security_rule(user, cloud_name, rule_id)
			.await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::connector::{CloudConnector, MockCloudConnector};
	use crate::test_support::{user, volume_order, RecordingPersistence};
	use broker_types::{Direction, EtherType, NetworkAllocation, NetworkSpec, Protocol};

	fn controller(local: MockCloudConnector) -> (OrderController, Arc<OrderRegistry>) {
		let registry = Arc::new(OrderRegistry::new("site-a"));
		let transitioner = Arc::new(OrderStateTransitioner::new(
			registry.clone(),
			Arc::new(RecordingPersistence::default()),
		));
		let local: Arc<dyn CloudConnector> = Arc::new(local);
		let connectors = Arc::new(ConnectorFactory::new("site-a", local, None));
		(
			OrderController::new(registry.clone(), transitioner, connectors),
			registry,
		)
	}

	fn rule(major_order_id: &str) -> SecurityRuleSpec {
		SecurityRuleSpec {
			major_order_id: major_order_id.to_string(),
			direction: Direction::Ingress,
			protocol: Protocol::Tcp,
			port_from: 22,
			port_to: 22,
			cidr: "0.0.0.0/0".into(),
			ether_type: EtherType::IPv4,
		}
	}

	#[tokio::test]
	async fn test_activation_resets_lifecycle_fields() {
		let (controller, registry) = controller(MockCloudConnector::new());
		let mut order = volume_order("site-a", "");
		order.state = OrderState::Fulfilled;
		order.instance_id = Some("stale".into());

		let id = controller.activate_order(order).await.unwrap();
		let stored = controller.get_order(&id).unwrap();
		assert_eq!(stored.state, OrderState::Open);
		assert_eq!(stored.instance_id, None);
		assert_eq!(stored.target_provider, "site-a");
		assert!(registry.orders_list(OrderState::Open).unwrap().contains(&id));
	}

	#[tokio::test]
	async fn test_duplicate_activation_is_already_exists() {
		let (controller, _) = controller(MockCloudConnector::new());
		let order = volume_order("site-a", "site-a");
		controller.activate_order(order.clone()).await.unwrap();
		assert!(matches!(
			controller.activate_order(order).await,
			Err(ControllerError::AlreadyExists(_))
		));
	}

	#[tokio::test]
	async fn test_delete_is_idempotent() {
		let (controller, registry) = controller(MockCloudConnector::new());
		let id = controller
			.activate_order(volume_order("site-a", "site-a"))
			.await
			.unwrap();

		controller.delete_order(&id).await.unwrap();
		controller.delete_order(&id).await.unwrap();

		assert_eq!(
			controller.get_order(&id).unwrap().state,
			OrderState::AssignedForDeletion
		);
		assert!(registry.verify_consistency().is_consistent());
		assert!(matches!(
			controller.delete_order("missing").await,
			Err(ControllerError::OrderNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_instance_of_unprovisioned_order() {
		let (controller, _) = controller(MockCloudConnector::new());
		let id = controller
			.activate_order(volume_order("site-a", "site-a"))
			.await
			.unwrap();
		assert!(matches!(
			controller.get_instance(&id).await,
			Err(ControllerError::Connector(ConnectorError::InstanceNotFound(_)))
		));
	}

	#[tokio::test]
	async fn test_security_rule_needs_network_or_public_ip() {
		let mut cloud = MockCloudConnector::new();
		cloud
			.expect_create_security_rule()
			.times(1)
			.returning(|_, _| Ok("rule-1".to_string()));
		let (controller, _) = controller(cloud);

		let volume = controller
			.activate_order(volume_order("site-a", "site-a"))
			.await
			.unwrap();
		assert!(matches!(
			controller.create_security_rule(&rule(&volume)).await,
			Err(ControllerError::InvalidOrder(_))
		));

		let network = Order::new(
			user(),
			"site-a",
			"site-a",
			"default",
			OrderPayload::Network(NetworkSpec {
				name: "net".into(),
				cidr: "10.0.0.0/24".into(),
				gateway: None,
				allocation: NetworkAllocation::Dynamic,
			}),
		);
		let network = controller.activate_order(network).await.unwrap();
		assert_eq!(
			controller.create_security_rule(&rule(&network)).await.unwrap(),
			"rule-1"
		);
	}
}
