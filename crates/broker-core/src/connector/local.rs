//! Connector over the local provider's cloud plugins.

use super::{CloudConnector, ConnectorError};
use async_trait::async_trait;
use broker_cloud::CloudService;
use broker_types::{
	FederationUser, Image, ImageSummary, Instance, Order, Quota, ResourceType, SecurityRuleSpec,
};
use std::sync::Arc;

/// Dispatches to the plugin registered under the order's `cloud_name`.
pub struct LocalConnector {
	clouds: Arc<CloudService>,
}

impl LocalConnector {
	pub fn new(clouds: Arc<CloudService>) -> Self {
		Self { clouds }
	}
}

#[async_trait]
impl CloudConnector for LocalConnector {
	async fn request_instance(&self, order: &Order) -> Result<String, ConnectorError> {
		Ok(self.clouds.request_instance(order).await?)
	}

	async fn get_instance(&self, order: &Order) -> Result<Instance, ConnectorError> {
		Ok(self.clouds.get_instance(order).await?)
	}

	async fn delete_instance(&self, order: &Order) -> Result<(), ConnectorError> {
		Ok(self.clouds.delete_instance(order).await?)
	}

	async fn get_user_quota(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		resource_type: ResourceType,
	) -> Result<Quota, ConnectorError> {
		Ok(self
			.clouds
			.get_user_quota(cloud_name, user, resource_type)
			.await?)
	}

	async fn get_image(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		image_id: &str,
	) -> Result<Image, ConnectorError> {
		Ok(self.clouds.get_image(cloud_name, user, image_id).await?)
	}

	async fn get_all_images(
		&self,
		user: &FederationUser,
		cloud_name: &str,
	) -> Result<Vec<ImageSummary>, ConnectorError> {
		Ok(self.clouds.get_all_images(cloud_name, user).await?)
	}

	async fn create_security_rule(
		&self,
		major_order: &Order,
		rule: &SecurityRuleSpec,
	) -> Result<String, ConnectorError> {
		Ok(self.clouds.create_security_rule(major_order, rule).await?)
	}

	async fn delete_security_rule(
		&self,
		user: &FederationUser,
		cloud_name: &str,
		rule_id: &str,
	) -> Result<(), ConnectorError> {
		Ok(self
			.clouds
			.delete_security_rule(cloud_name, user, rule_id)
			.await?)
	}
}
