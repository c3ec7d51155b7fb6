//! Simulated cloud plugin.
//!
//! Keeps instances in memory and reports them READY as soon as they are
//! requested. Quotas are enforced per user from the configured totals. Used
//! for development setups and tests that need a real plugin behind the
//! local connector.

use crate::{CloudError, CloudFactory, CloudPlugin, CloudRegistry};
use async_trait::async_trait;
use broker_types::{
	ConfigSchema, FederationUser, Field, FieldType, Image, ImageSummary, ImplementationRegistry,
	Instance, InstanceState, Order, OrderPayload, Quota, ResourceAllocation, ResourceType, Schema,
	SecurityRuleSpec, ValidationError, ATTR_IP_ADDRESS, ATTR_SSH_PORT,
};
use parking_lot::Mutex;
use std::collections::HashMap;

struct SimulatedInstance {
	state: InstanceState,
	owner: String,
	usage: ResourceAllocation,
}

#[derive(Default)]
struct SimulatedState {
	instances: HashMap<String, SimulatedInstance>,
	used: HashMap<String, ResourceAllocation>,
	rules: HashMap<String, String>,
}

/// In-memory cloud.
pub struct SimulatedCloud {
	quota: ResourceAllocation,
	images: Vec<Image>,
	instance_address: Option<String>,
	ssh_port: Option<u16>,
	state: Mutex<SimulatedState>,
}

impl Default for SimulatedCloud {
	fn default() -> Self {
		Self::new(default_quota(), Vec::new(), None, None)
	}
}

fn default_quota() -> ResourceAllocation {
	ResourceAllocation {
		instances: 100,
		vcpu: 400,
		ram_mb: 1024 * 1024,
		disk_gb: 10_000,
		networks: 50,
		public_ips: 50,
	}
}

fn usage_of(order: &Order) -> ResourceAllocation {
	match &order.payload {
		OrderPayload::Compute(spec) => ResourceAllocation {
			instances: 1,
			vcpu: spec.vcpu,
			ram_mb: spec.ram_mb,
			disk_gb: spec.disk_gb,
			..Default::default()
		},
		OrderPayload::Volume(spec) => ResourceAllocation {
			disk_gb: spec.size_gb,
			..Default::default()
		},
		OrderPayload::Network(_) => ResourceAllocation {
			networks: 1,
			..Default::default()
		},
		OrderPayload::PublicIp(_) => ResourceAllocation {
			public_ips: 1,
			..Default::default()
		},
		OrderPayload::Attachment(_) | OrderPayload::Image(_) | OrderPayload::SecurityRule(_) => {
			ResourceAllocation::default()
		},
	}
}

fn fits(used: &ResourceAllocation, extra: &ResourceAllocation, total: &ResourceAllocation) -> bool {
	used.instances + extra.instances <= total.instances
		&& used.vcpu + extra.vcpu <= total.vcpu
		&& used.ram_mb + extra.ram_mb <= total.ram_mb
		&& used.disk_gb + extra.disk_gb <= total.disk_gb
		&& used.networks + extra.networks <= total.networks
		&& used.public_ips + extra.public_ips <= total.public_ips
}

fn sub(a: &mut ResourceAllocation, b: &ResourceAllocation) {
	a.instances = a.instances.saturating_sub(b.instances);
	a.vcpu = a.vcpu.saturating_sub(b.vcpu);
	a.ram_mb = a.ram_mb.saturating_sub(b.ram_mb);
	a.disk_gb = a.disk_gb.saturating_sub(b.disk_gb);
	a.networks = a.networks.saturating_sub(b.networks);
	a.public_ips = a.public_ips.saturating_sub(b.public_ips);
}

fn add(a: &mut ResourceAllocation, b: &ResourceAllocation) {
	a.instances += b.instances;
	a.vcpu += b.vcpu;
	a.ram_mb += b.ram_mb;
	a.disk_gb += b.disk_gb;
	a.networks += b.networks;
	a.public_ips += b.public_ips;
}

impl SimulatedCloud {
	pub fn new(
		quota: ResourceAllocation,
		images: Vec<Image>,
		instance_address: Option<String>,
		ssh_port: Option<u16>,
	) -> Self {
		Self {
			quota,
			images,
			instance_address,
			ssh_port,
			state: Mutex::new(SimulatedState::default()),
		}
	}

	/// Forces an instance into a state, e.g. to simulate a crash.
	pub fn set_instance_state(&self, instance_id: &str, state: InstanceState) -> bool {
		let mut inner = self.state.lock();
		match inner.instances.get_mut(instance_id) {
			Some(instance) => {
				instance.state = state;
				true
			},
			None => false,
		}
	}

	pub fn instance_count(&self) -> usize {
		self.state.lock().instances.len()
	}

	fn instance_id_of<'a>(&self, order: &'a Order) -> Result<&'a str, CloudError> {
		order
			.instance_id
			.as_deref()
			.ok_or_else(|| CloudError::InvalidParameter(format!("Order {} has no instance", order.id)))
	}
}

#[async_trait]
impl CloudPlugin for SimulatedCloud {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SimulatedCloudSchema)
	}

	async fn request_instance(&self, order: &Order) -> Result<String, CloudError> {
		let usage = usage_of(order);
		let mut inner = self.state.lock();

		let used = inner
			.used
			.get(&order.owner.user_id)
			.copied()
			.unwrap_or_default();
		if !fits(&used, &usage, &self.quota) {
			return Err(CloudError::QuotaExceeded(format!(
				"{} request for user {} exceeds quota",
				order.resource_type(),
				order.owner.user_id
			)));
		}

		let instance_id = format!(
			"sim-{}-{}",
			order.resource_type().as_str().to_lowercase(),
			uuid::Uuid::new_v4()
		);
		add(inner.used.entry(order.owner.user_id.clone()).or_default(), &usage);
		inner.instances.insert(
			instance_id.clone(),
			SimulatedInstance {
				state: InstanceState::Ready,
				owner: order.owner.user_id.clone(),
				usage,
			},
		);
		tracing::debug!(instance_id = %instance_id, "Simulated instance created");
		Ok(instance_id)
	}

	async fn get_instance(&self, order: &Order) -> Result<Instance, CloudError> {
		let instance_id = self.instance_id_of(order)?;
		let inner = self.state.lock();
		let simulated = inner
			.instances
			.get(instance_id)
			.ok_or_else(|| CloudError::InstanceNotFound(instance_id.to_string()))?;

		let mut instance = Instance::new(instance_id, simulated.state);
		if order.resource_type() == ResourceType::Compute {
			if let Some(address) = &self.instance_address {
				instance = instance.with_attribute(ATTR_IP_ADDRESS, address.clone());
			}
			if let Some(port) = self.ssh_port {
				instance = instance.with_attribute(ATTR_SSH_PORT, port.to_string());
			}
		}
		Ok(instance)
	}

	async fn delete_instance(&self, order: &Order) -> Result<(), CloudError> {
		let instance_id = self.instance_id_of(order)?;
		let mut inner = self.state.lock();
		let removed = inner
			.instances
			.remove(instance_id)
			.ok_or_else(|| CloudError::InstanceNotFound(instance_id.to_string()))?;
		if let Some(used) = inner.used.get_mut(&removed.owner) {
			sub(used, &removed.usage);
		}
		Ok(())
	}

	async fn get_user_quota(
		&self,
		user: &FederationUser,
		_resource_type: ResourceType,
	) -> Result<Quota, CloudError> {
		let inner = self.state.lock();
		Ok(Quota {
			total: self.quota,
			used: inner.used.get(&user.user_id).copied().unwrap_or_default(),
		})
	}

	async fn get_image(&self, _user: &FederationUser, image_id: &str) -> Result<Image, CloudError> {
		self.images
			.iter()
			.find(|image| image.id == image_id)
			.cloned()
			.ok_or_else(|| CloudError::InstanceNotFound(format!("image {}", image_id)))
	}

	async fn get_all_images(
		&self,
		_user: &FederationUser,
	) -> Result<Vec<ImageSummary>, CloudError> {
		Ok(self
			.images
			.iter()
			.map(|image| ImageSummary {
				id: image.id.clone(),
				name: image.name.clone(),
			})
			.collect())
	}

	async fn create_security_rule(
		&self,
		major_order: &Order,
		rule: &SecurityRuleSpec,
	) -> Result<String, CloudError> {
		if rule.port_from > rule.port_to {
			return Err(CloudError::InvalidParameter(format!(
				"port_from {} is greater than port_to {}",
				rule.port_from, rule.port_to
			)));
		}
		let instance_id = self.instance_id_of(major_order)?.to_string();
		let mut inner = self.state.lock();
		if !inner.instances.contains_key(&instance_id) {
			return Err(CloudError::InstanceNotFound(instance_id));
		}
		let rule_id = format!("sim-rule-{}", uuid::Uuid::new_v4());
		inner.rules.insert(rule_id.clone(), instance_id);
		Ok(rule_id)
	}

	async fn delete_security_rule(
		&self,
		_user: &FederationUser,
		rule_id: &str,
	) -> Result<(), CloudError> {
		self.state
			.lock()
			.rules
			.remove(rule_id)
			.map(|_| ())
			.ok_or_else(|| CloudError::InstanceNotFound(format!("rule {}", rule_id)))
	}
}

/// Configuration schema for the simulated cloud.
pub struct SimulatedCloudSchema;

impl ConfigSchema for SimulatedCloudSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let non_negative = || FieldType::Integer {
			min: Some(0),
			max: None,
		};
		let quota = Schema::new(
			vec![],
			vec![
				Field::new("instances", non_negative()),
				Field::new("vcpu", non_negative()),
				Field::new("ram_mb", non_negative()),
				Field::new("disk_gb", non_negative()),
				Field::new("networks", non_negative()),
				Field::new("public_ips", non_negative()),
			],
		);
		let image = Schema::new(
			vec![
				Field::new("id", FieldType::String),
				Field::new("name", FieldType::String),
			],
			vec![Field::new("size_bytes", non_negative())],
		);
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("plugin", FieldType::String),
				Field::new("instance_address", FieldType::String),
				Field::new(
					"ssh_port",
					FieldType::Integer {
						min: Some(1),
						max: Some(65535),
					},
				),
				Field::new("quota", FieldType::Table(quota)),
				Field::new("images", FieldType::Array(Box::new(FieldType::Table(image)))),
			],
		);
		schema.validate(config)
	}
}

fn int(table: Option<&toml::Value>, key: &str) -> Option<u64> {
	table
		.and_then(|t| t.get(key))
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
}

/// Factory function to create a simulated cloud from configuration.
///
/// Configuration parameters:
/// - `instance_address`: address reported for compute instances (optional)
/// - `ssh_port`: port reported for compute instances (optional)
/// - `quota`: table with per-user totals (`instances`, `vcpu`, `ram_mb`,
///   `disk_gb`, `networks`, `public_ips`)
/// - `images`: array of `{ id, name, size_bytes }`
pub fn create_cloud(config: &toml::Value) -> Result<Box<dyn CloudPlugin>, CloudError> {
	SimulatedCloudSchema
		.validate(config)
		.map_err(|e| CloudError::InvalidParameter(e.to_string()))?;

	let defaults = default_quota();
	let quota_table = config.get("quota");
	let quota = ResourceAllocation {
		instances: int(quota_table, "instances").map_or(defaults.instances, |v| v as u32),
		vcpu: int(quota_table, "vcpu").map_or(defaults.vcpu, |v| v as u32),
		ram_mb: int(quota_table, "ram_mb").unwrap_or(defaults.ram_mb),
		disk_gb: int(quota_table, "disk_gb").unwrap_or(defaults.disk_gb),
		networks: int(quota_table, "networks").map_or(defaults.networks, |v| v as u32),
		public_ips: int(quota_table, "public_ips").map_or(defaults.public_ips, |v| v as u32),
	};

	let images = config
		.get("images")
		.and_then(|v| v.as_array())
		.map(|entries| {
			entries
				.iter()
				.map(|entry| Image {
					id: entry
						.get("id")
						.and_then(|v| v.as_str())
						.unwrap_or_default()
						.to_string(),
					name: entry
						.get("name")
						.and_then(|v| v.as_str())
						.unwrap_or_default()
						.to_string(),
					size_bytes: int(Some(entry), "size_bytes").unwrap_or(0),
					status: "ACTIVE".to_string(),
				})
				.collect()
		})
		.unwrap_or_default();

	let instance_address = config
		.get("instance_address")
		.and_then(|v| v.as_str())
		.map(String::from);
	let ssh_port = int(Some(config), "ssh_port").map(|v| v as u16);

	Ok(Box::new(SimulatedCloud::new(
		quota,
		images,
		instance_address,
		ssh_port,
	)))
}

/// Registry for the simulated cloud implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "simulated";
	type Factory = CloudFactory;

	fn factory() -> Self::Factory {
		create_cloud
	}
}

impl CloudRegistry for Registry {}
