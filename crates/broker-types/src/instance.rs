//! Provider-side views returned by clouds: instances, quotas and images.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute key holding the address used for reachability checks.
pub const ATTR_IP_ADDRESS: &str = "ip_address";
/// Attribute key overriding the port used for reachability checks.
pub const ATTR_SSH_PORT: &str = "ssh_port";

/// Provider-side status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
	Creating,
	Ready,
	Busy,
	Failed,
	Unknown,
}

/// Current provider-side view of a provisioned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
	pub id: String,
	pub state: InstanceState,
	/// Provider specific attributes such as addresses or device names.
	#[serde(default)]
	pub attributes: BTreeMap<String, String>,
}

impl Instance {
	pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
		Self {
			id: id.into(),
			state,
			attributes: BTreeMap::new(),
		}
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}

	pub fn is_ready(&self) -> bool {
		self.state == InstanceState::Ready
	}

	pub fn has_failed(&self) -> bool {
		self.state == InstanceState::Failed
	}
}

/// Amount of each resource kind a quota tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
	pub instances: u32,
	pub vcpu: u32,
	pub ram_mb: u64,
	pub disk_gb: u64,
	pub networks: u32,
	pub public_ips: u32,
}

impl ResourceAllocation {
	fn saturating_sub(&self, other: &Self) -> Self {
		Self {
			instances: self.instances.saturating_sub(other.instances),
			vcpu: self.vcpu.saturating_sub(other.vcpu),
			ram_mb: self.ram_mb.saturating_sub(other.ram_mb),
			disk_gb: self.disk_gb.saturating_sub(other.disk_gb),
			networks: self.networks.saturating_sub(other.networks),
			public_ips: self.public_ips.saturating_sub(other.public_ips),
		}
	}
}

/// Quota of a user on one cloud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
	pub total: ResourceAllocation,
	pub used: ResourceAllocation,
}

impl Quota {
	pub fn available(&self) -> ResourceAllocation {
		self.total.saturating_sub(&self.used)
	}
}

/// Entry of an image listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
	pub id: String,
	pub name: String,
}

/// Full image description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
	pub id: String,
	pub name: String,
	pub size_bytes: u64,
	pub status: String,
}
