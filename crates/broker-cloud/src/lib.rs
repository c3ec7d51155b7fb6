//! Cloud plugin module for the resource-allocation broker.
//!
//! A cloud plugin talks to one concrete cloud on behalf of the local
//! provider. The broker addresses plugins by cloud name through the
//! [`CloudService`]; the order lifecycle never sees vendor APIs directly.

use async_trait::async_trait;
use broker_types::{
	ConfigSchema, FederationUser, Image, ImageSummary, ImplementationRegistry, Instance, Order,
	Quota, ResourceType, SecurityRuleSpec,
};
use std::collections::HashMap;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod simulated;
}

/// Errors reported by cloud plugins.
#[derive(Debug, Error)]
pub enum CloudError {
	/// The cloud could not be reached or is not configured.
	#[error("Unavailable provider: {0}")]
	UnavailableProvider(String),
	/// The cloud does not know the instance.
	#[error("Instance not found: {0}")]
	InstanceNotFound(String),
	/// The user's quota does not cover the request.
	#[error("Quota exceeded: {0}")]
	QuotaExceeded(String),
	/// The request is malformed for this cloud.
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	/// Any other failure.
	#[error("Unexpected error: {0}")]
	Unexpected(String),
}

/// Interface every cloud plugin implements.
///
/// Instance-scoped operations receive the whole order so plugins can use
/// the payload, the owner and the recorded `instance_id`.
#[async_trait]
pub trait CloudPlugin: Send + Sync {
	/// Returns the configuration schema for this plugin.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Provisions the resource described by the order and returns its
	/// provider-side id.
	async fn request_instance(&self, order: &Order) -> Result<String, CloudError>;

	/// Current provider-side view of the order's instance.
	async fn get_instance(&self, order: &Order) -> Result<Instance, CloudError>;

	/// Releases the order's instance.
	async fn delete_instance(&self, order: &Order) -> Result<(), CloudError>;

	async fn get_user_quota(
		&self,
		user: &FederationUser,
		resource_type: ResourceType,
	) -> Result<Quota, CloudError>;

	async fn get_image(&self, user: &FederationUser, image_id: &str) -> Result<Image, CloudError>;

	async fn get_all_images(&self, user: &FederationUser)
		-> Result<Vec<ImageSummary>, CloudError>;

	/// Creates a rule on the instance of the order it belongs to and
	/// returns the rule id.
	async fn create_security_rule(
		&self,
		major_order: &Order,
		rule: &SecurityRuleSpec,
	) -> Result<String, CloudError>;

	async fn delete_security_rule(
		&self,
		user: &FederationUser,
		rule_id: &str,
	) -> Result<(), CloudError>;
}

/// Type alias for cloud plugin factory functions.
pub type CloudFactory = fn(&toml::Value) -> Result<Box<dyn CloudPlugin>, CloudError>;

/// Registry trait for cloud plugin implementations.
pub trait CloudRegistry: ImplementationRegistry<Factory = CloudFactory> {}

/// Get all registered cloud plugin implementations.
pub fn get_all_implementations() -> Vec<(&'static str, CloudFactory)> {
	use implementations::simulated;

	vec![(simulated::Registry::NAME, simulated::Registry::factory())]
}

/// Plugins of the local provider keyed by cloud name.
pub struct CloudService {
	clouds: HashMap<String, Box<dyn CloudPlugin>>,
	default_cloud: String,
}

impl CloudService {
	pub fn new(clouds: HashMap<String, Box<dyn CloudPlugin>>, default_cloud: String) -> Self {
		Self {
			clouds,
			default_cloud,
		}
	}

	/// Cloud used when an order does not name one.
	pub fn default_cloud(&self) -> &str {
		&self.default_cloud
	}

	/// Resolves a cloud by name; an empty name selects the default cloud.
	pub fn plugin(&self, cloud_name: &str) -> Result<&dyn CloudPlugin, CloudError> {
		let name = if cloud_name.is_empty() {
			self.default_cloud.as_str()
		} else {
			cloud_name
		};
		self.clouds
			.get(name)
			.map(|plugin| plugin.as_ref())
			.ok_or_else(|| CloudError::UnavailableProvider(format!("Unknown cloud '{}'", name)))
	}

	pub async fn request_instance(&self, order: &Order) -> Result<String, CloudError> {
		self.plugin(&order.cloud_name)?.request_instance(order).await
	}

	pub async fn get_instance(&self, order: &Order) -> Result<Instance, CloudError> {
		self.plugin(&order.cloud_name)?.get_instance(order).await
	}

	pub async fn delete_instance(&self, order: &Order) -> Result<(), CloudError> {
		self.plugin(&order.cloud_name)?.delete_instance(order).await
	}

	pub async fn get_user_quota(
		&self,
		cloud_name: &str,
		user: &FederationUser,
		resource_type: ResourceType,
	) -> Result<Quota, CloudError> {
		self.plugin(cloud_name)?
			.get_user_quota(user, resource_type)
			.await
	}

	pub async fn get_image(
		&self,
		cloud_name: &str,
		user: &FederationUser,
		image_id: &str,
	) -> Result<Image, CloudError> {
		self.plugin(cloud_name)?.get_image(user, image_id).await
	}

	pub async fn get_all_images(
		&self,
		cloud_name: &str,
		user: &FederationUser,
	) -> Result<Vec<ImageSummary>, CloudError> {
		self.plugin(cloud_name)?.get_all_images(user).await
	}

	pub async fn create_security_rule(
		&self,
		major_order: &Order,
		rule: &SecurityRuleSpec,
	) -> Result<String, CloudError> {
		self.plugin(&major_order.cloud_name)?
			.create_security_rule(major_order, rule)
			.await
	}

	pub async fn delete_security_rule(
		&self,
		cloud_name: &str,
		user: &FederationUser,
		rule_id: &str,
	) -> Result<(), CloudError> {
		self.plugin(cloud_name)?
			.delete_security_rule(user, rule_id)
			.await
	}
}
