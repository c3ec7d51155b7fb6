//! Boundary between the order lifecycle and the providers hosting orders.
//!
//! Workers and the controller never talk to a cloud plugin or a peer
//! directly. They ask the [`ConnectorFactory`] for the connector of an
//! order's target provider: the local provider is served by a
//! [`LocalConnector`] over the configured cloud plugins, every other
//! provider by a [`RemoteConnector`] speaking the federation protocol.

use async_trait::async_trait;
use broker_cloud::CloudError;
use broker_federation::{FederationClient, FederationError, RemoteErrorKind};
use broker_types::{
	FederationUser, Image, ImageSummary, Instance, Order, Quota, ResourceType, SecurityRuleSpec,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

mod local;
mod remote;

pub use local::LocalConnector;
pub use remote::RemoteConnector;

/// Errors reported by a connector, whichever provider answered.
#[derive(Debug, Error)]
pub enum ConnectorError {
	#[error("Unavailable provider: {0}")]
	UnavailableProvider(String),
	#[error("Instance not found: {0}")]
	InstanceNotFound(String),
	#[error("Authorization error: {0}")]
	Authorization(String),
	#[error("Already exists: {0}")]
	AlreadyExists(String),
	#[error("Quota exceeded: {0}")]
	QuotaExceeded(String),
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	#[error("Unexpected error: {0}")]
	Unexpected(String),
}

impl ConnectorError {
	/// Error class used when the failure is reported to a peer.
	pub fn remote_kind(&self) -> RemoteErrorKind {
		match self {
			Self::UnavailableProvider(_) => RemoteErrorKind::UnavailableProvider,
			Self::InstanceNotFound(_) => RemoteErrorKind::InstanceNotFound,
			Self::Authorization(_) => RemoteErrorKind::Authorization,
			Self::AlreadyExists(_) => RemoteErrorKind::AlreadyExists,
			Self::QuotaExceeded(_) => RemoteErrorKind::QuotaExceeded,
			Self::InvalidParameter(_) => RemoteErrorKind::InvalidRequest,
			Self::Unexpected(_) => RemoteErrorKind::Unexpected,
		}
	}
}

impl From<CloudError> for ConnectorError {
	fn from(err: CloudError) -> Self {
		match err {
			CloudError::UnavailableProvider(msg) => Self::UnavailableProvider(msg),
			CloudError::InstanceNotFound(msg) => Self::InstanceNotFound(msg),
			CloudError::QuotaExceeded(msg) => Self::QuotaExceeded(msg),
			CloudError::InvalidParameter(msg) => Self::InvalidParameter(msg),
			CloudError::Unexpected(msg) => Self::Unexpected(msg),
		}
	}
}

impl From<FederationError> for ConnectorError {
	fn from(err: FederationError) -> Self {
		match err {
			FederationError::Transport(msg) => Self::UnavailableProvider(msg),
			FederationError::UnknownPeer(peer) => {
				Self::UnavailableProvider(format!("Unknown peer '{}'", peer))
			},
			FederationError::Remote { kind, message } => match kind {
				RemoteErrorKind::Authorization => Self::Authorization(message),
				RemoteErrorKind::InstanceNotFound => Self::InstanceNotFound(message),
				RemoteErrorKind::UnavailableProvider => Self::UnavailableProvider(message),
				RemoteErrorKind::InvalidRequest => Self::InvalidParameter(message),
				RemoteErrorKind::AlreadyExists => Self::AlreadyExists(message),
				RemoteErrorKind::QuotaExceeded => Self::QuotaExceeded(message),
				RemoteErrorKind::Unexpected => Self::Unexpected(message),
			},
			FederationError::Codec(msg) => Self::Unexpected(msg),
			FederationError::Authorization(msg) => Self::Authorization(msg),
		}
	}
}

/// Provider-neutral operations on the resources of an order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudConnector: Send + Sync {
	/// Starts provisioning. Returns the instance id when the provider is
	/// local and the accepted order id when the order was forwarded.
	async fn request_instance(&self, order: &Order) -> Result<String, ConnectorError>;

	async fn get_instance(&self, order: &Order) -> Result<Instance, ConnectorError>;

	async fn delete_instance(&self, order: &Order) -> Result<(), ConnectorError>;

	async fn get_user_quota(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		resource_type: ResourceType,
	) -> Result<Quota, ConnectorError>;

	async fn get_image(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		image_id: &str,
	) -> Result<Image, ConnectorError>;

	async fn get_all_images(
		&self,
		user: &FederationUser,
		cloud_name: &str,
	) -> Result<Vec<ImageSummary>, ConnectorError>;

	async fn create_security_rule(
		&self,
		major_order: &Order,
		rule: &SecurityRuleSpec,
	) -> Result<String, ConnectorError>;

	async fn delete_security_rule(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		rule_id: &str,
	) -> Result<(), ConnectorError>;
}

/// Resolves the connector serving a target provider.
pub struct ConnectorFactory {
	local_provider: String,
	local: Arc<dyn CloudConnector>,
	federation: Option<FederationClient>,
	peers: HashMap<String, Arc<dyn CloudConnector>>,
}

impl ConnectorFactory {
	pub fn new(
		local_provider: impl Into<String>,
		local: Arc<dyn CloudConnector>,
		federation: Option<FederationClient>,
	) -> Self {
		Self {
			local_provider: local_provider.into(),
			local,
			federation,
			peers: HashMap::new(),
		}
	}

	/// Serves `peer` with a fixed connector instead of the federation client.
	pub fn with_peer_connector(
		mut self,
		peer: impl Into<String>,
		connector: Arc<dyn CloudConnector>,
	) -> Self {
		self.peers.insert(peer.into(), connector);
		self
	}

	pub fn local_provider(&self) -> &str {
		&self.local_provider
	}

	pub fn connector_for(&self, target_provider: &str) -> Result<Arc<dyn CloudConnector>, ConnectorError> {
		if target_provider == self.local_provider {
			return Ok(self.local.clone());
		}
		if let Some(connector) = self.peers.get(target_provider) {
			return Ok(connector.clone());
		}
		match &self.federation {
			Some(client) => Ok(Arc::new(RemoteConnector::new(target_provider, client.clone()))),
			None => Err(ConnectorError::UnavailableProvider(format!(
				"No federation client to reach '{}'",
				target_provider
			))),
		}
	}
}
