//! Order types for the broker.
//!
//! An order is one tracked resource request. All resource types share the
//! same `Order` struct; the type-specific part lives in the closed
//! `OrderPayload` sum type whose variant is the resource-type discriminant.

use crate::{current_timestamp, InstanceState, OrderState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the federated user that requested an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FederationUser {
	/// Identifier unique within the identity provider.
	pub user_id: String,
	/// Human readable user name.
	pub user_name: String,
	/// Provider that authenticated the user.
	pub identity_provider: String,
}

/// Discriminant of the resource an order asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
	Compute,
	Network,
	Volume,
	Attachment,
	Image,
	PublicIp,
	SecurityRule,
}

impl ResourceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Compute => "COMPUTE",
			Self::Network => "NETWORK",
			Self::Volume => "VOLUME",
			Self::Attachment => "ATTACHMENT",
			Self::Image => "IMAGE",
			Self::PublicIp => "PUBLIC_IP",
			Self::SecurityRule => "SECURITY_RULE",
		}
	}

	/// Whether a READY instance of this type must also be reachable over the
	/// network before the order counts as fulfilled.
	pub fn requires_reachability_check(&self) -> bool {
		matches!(self, Self::Compute)
	}
}

impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Virtual machine request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeSpec {
	pub name: String,
	pub vcpu: u32,
	pub ram_mb: u64,
	pub disk_gb: u64,
	pub image_id: String,
	/// Network orders the instance should be attached to.
	#[serde(default)]
	pub network_order_ids: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub public_key: Option<String>,
}

/// Address allocation mode of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkAllocation {
	Dynamic,
	Static,
}

/// Private network request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
	pub name: String,
	pub cidr: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gateway: Option<String>,
	pub allocation: NetworkAllocation,
}

/// Block storage request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
	pub name: String,
	pub size_gb: u64,
}

/// Request to attach a volume order to a compute order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSpec {
	pub compute_order_id: String,
	pub volume_order_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device: Option<String>,
}

/// Request to register an image derived from an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
	pub name: String,
	pub source_image_id: String,
}

/// Request for a public address bound to a compute order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIpSpec {
	pub compute_order_id: String,
}

/// Traffic direction of a security rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Ingress,
	Egress,
}

/// Transport protocol matched by a security rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	Tcp,
	Udp,
	Icmp,
	Any,
}

/// Address family matched by a security rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EtherType {
	IPv4,
	IPv6,
}

/// Firewall rule on a network or public IP order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRuleSpec {
	/// Network or public IP order the rule belongs to.
	pub major_order_id: String,
	pub direction: Direction,
	pub protocol: Protocol,
	pub port_from: u16,
	pub port_to: u16,
	pub cidr: String,
	pub ether_type: EtherType,
}

/// Type-specific part of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource_type", content = "spec", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPayload {
	Compute(ComputeSpec),
	Network(NetworkSpec),
	Volume(VolumeSpec),
	Attachment(AttachmentSpec),
	Image(ImageSpec),
	PublicIp(PublicIpSpec),
	SecurityRule(SecurityRuleSpec),
}

impl OrderPayload {
	pub fn resource_type(&self) -> ResourceType {
		match self {
			Self::Compute(_) => ResourceType::Compute,
			Self::Network(_) => ResourceType::Network,
			Self::Volume(_) => ResourceType::Volume,
			Self::Attachment(_) => ResourceType::Attachment,
			Self::Image(_) => ResourceType::Image,
			Self::PublicIp(_) => ResourceType::PublicIp,
			Self::SecurityRule(_) => ResourceType::SecurityRule,
		}
	}
}

/// A tracked resource request moving through the order lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Globally unique identifier, immutable after creation.
	pub id: String,
	/// Current lifecycle state. Only the state transitioner mutates it.
	pub state: OrderState,
	/// Federated user that requested the order.
	pub owner: FederationUser,
	/// Provider the request originated from.
	pub requesting_provider: String,
	/// Provider expected to host the resource.
	pub target_provider: String,
	/// Cloud of the target provider the resource is provisioned on.
	pub cloud_name: String,
	/// Provider-side identifier, assigned once provisioning succeeds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instance_id: Option<String>,
	/// Last observed provider-side instance state.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cached_instance_state: Option<InstanceState>,
	/// Cause of the last failure transition.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fault_message: Option<String>,
	pub created_at: u64,
	pub updated_at: u64,
	/// Bumped on every committed change; orders persisted snapshots.
	#[serde(default)]
	pub version: u64,
	pub payload: OrderPayload,
}

impl Order {
	/// Creates a new OPEN order with a generated identifier.
	pub fn new(
		owner: FederationUser,
		requesting_provider: impl Into<String>,
		target_provider: impl Into<String>,
		cloud_name: impl Into<String>,
		payload: OrderPayload,
	) -> Self {
		let now = current_timestamp();
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			state: OrderState::Open,
			owner,
			requesting_provider: requesting_provider.into(),
			target_provider: target_provider.into(),
			cloud_name: cloud_name.into(),
			instance_id: None,
			cached_instance_state: None,
			fault_message: None,
			created_at: now,
			updated_at: now,
			version: 0,
			payload,
		}
	}

	pub fn resource_type(&self) -> ResourceType {
		self.payload.resource_type()
	}

	pub fn spec(&self) -> &OrderPayload {
		&self.payload
	}

	/// True when the resource is hosted by the given (local) provider.
	pub fn is_provider_local(&self, local_provider: &str) -> bool {
		self.target_provider == local_provider
	}

	/// True when the request came from a provider other than the given one.
	pub fn is_requester_remote(&self, local_provider: &str) -> bool {
		self.requesting_provider != local_provider
	}
}
