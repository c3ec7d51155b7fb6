//! Wire schema of the federation protocol.
//!
//! Every message is a JSON object whose `kind` field names the variant, so
//! the set of verbs is closed and checked at decode time.

use broker_types::{
	FederationUser, Image, ImageSummary, Instance, Order, Quota, ResourceType, SecurityRuleSpec,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A request together with the provider that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationEnvelope {
	/// Provider id of the sender.
	pub sender: String,
	pub request: FederationRequest,
}

impl FederationEnvelope {
	pub fn new(sender: impl Into<String>, request: FederationRequest) -> Self {
		Self {
			sender: sender.into(),
			request,
		}
	}
}

/// Lifecycle events a hosting provider reports back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FederationEvent {
	InstanceFulfilled,
	InstanceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FederationRequest {
	CreateOrder {
		order: Order,
	},
	DeleteOrder {
		order_id: String,
	},
	GetOrder {
		order_id: String,
	},
	GetInstance {
		order_id: String,
	},
	GetUserQuota {
		user: FederationUser,
		cloud_name: String,
		resource_type: ResourceType,
	},
	GetImage {
		user: FederationUser,
		cloud_name: String,
		image_id: String,
	},
	GetAllImages {
		user: FederationUser,
		cloud_name: String,
	},
	CreateSecurityRule {
		order_id: String,
		rule: SecurityRuleSpec,
	},
	DeleteSecurityRule {
		user: FederationUser,
		cloud_name: String,
		rule_id: String,
	},
	NotifyEvent {
		event: FederationEvent,
		order_id: String,
	},
}

impl FederationRequest {
	/// Wire name of the verb, for logging.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::CreateOrder { .. } => "CREATE_ORDER",
			Self::DeleteOrder { .. } => "DELETE_ORDER",
			Self::GetOrder { .. } => "GET_ORDER",
			Self::GetInstance { .. } => "GET_INSTANCE",
			Self::GetUserQuota { .. } => "GET_USER_QUOTA",
			Self::GetImage { .. } => "GET_IMAGE",
			Self::GetAllImages { .. } => "GET_ALL_IMAGES",
			Self::CreateSecurityRule { .. } => "CREATE_SECURITY_RULE",
			Self::DeleteSecurityRule { .. } => "DELETE_SECURITY_RULE",
			Self::NotifyEvent { .. } => "NOTIFY_EVENT",
		}
	}

	/// Order the request is scoped to, if any.
	pub fn order_id(&self) -> Option<&str> {
		match self {
			Self::CreateOrder { order } => Some(&order.id),
			Self::DeleteOrder { order_id }
			| Self::GetOrder { order_id }
			| Self::GetInstance { order_id }
			| Self::CreateSecurityRule { order_id, .. }
			| Self::NotifyEvent { order_id, .. } => Some(order_id),
			Self::GetUserQuota { .. }
			| Self::GetImage { .. }
			| Self::GetAllImages { .. }
			| Self::DeleteSecurityRule { .. } => None,
		}
	}
}

/// Error classes a peer can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteErrorKind {
	Authorization,
	InstanceNotFound,
	UnavailableProvider,
	InvalidRequest,
	AlreadyExists,
	QuotaExceeded,
	Unexpected,
}

impl fmt::Display for RemoteErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Authorization => "authorization",
			Self::InstanceNotFound => "instance not found",
			Self::UnavailableProvider => "unavailable provider",
			Self::InvalidRequest => "invalid request",
			Self::AlreadyExists => "already exists",
			Self::QuotaExceeded => "quota exceeded",
			Self::Unexpected => "unexpected",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FederationResponse {
	OrderAccepted {
		order_id: String,
	},
	Order {
		order: Order,
	},
	Instance {
		instance: Instance,
	},
	Quota {
		quota: Quota,
	},
	Image {
		image: Image,
	},
	Images {
		images: Vec<ImageSummary>,
	},
	SecurityRuleCreated {
		rule_id: String,
	},
	Ack,
	Error {
		error: RemoteErrorKind,
		message: String,
	},
}

impl FederationResponse {
	pub fn error(error: RemoteErrorKind, message: impl Into<String>) -> Self {
		Self::Error {
			error,
			message: message.into(),
		}
	}
}
