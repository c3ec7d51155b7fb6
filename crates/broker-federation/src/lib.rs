//! Federation module for the resource-allocation broker.
//!
//! Peers exchange [`FederationEnvelope`]s carrying one closed
//! [`FederationRequest`] each and answer with a [`FederationResponse`].
//! The transport is pluggable through [`PeerClient`]: [`HttpPeerClient`]
//! posts JSON to a peer's federation endpoint while [`InProcessNetwork`]
//! delivers envelopes to handlers living in the same process.

use async_trait::async_trait;
use thiserror::Error;

pub mod auth;
pub mod client;
pub mod http;
pub mod local;
pub mod messages;

pub use auth::{AllowListAuthorizer, PeerAuthorizer};
pub use client::FederationClient;
pub use http::HttpPeerClient;
pub use local::InProcessNetwork;
pub use messages::{
	FederationEnvelope, FederationEvent, FederationRequest, FederationResponse, RemoteErrorKind,
};

/// Errors that can occur while talking to a federation peer.
#[derive(Debug, Error)]
pub enum FederationError {
	/// The peer could not be reached or the exchange broke off.
	#[error("Transport error: {0}")]
	Transport(String),
	/// No address or handler is known for the peer.
	#[error("Unknown peer: {0}")]
	UnknownPeer(String),
	/// The peer answered with an error.
	#[error("Remote error ({kind}): {message}")]
	Remote {
		kind: RemoteErrorKind,
		message: String,
	},
	/// A message could not be encoded or decoded, or had the wrong shape.
	#[error("Codec error: {0}")]
	Codec(String),
	/// The sender is not allowed to issue the request.
	#[error("Authorization error: {0}")]
	Authorization(String),
}

impl FederationError {
	/// Remote error class, when the peer answered with one.
	pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
		match self {
			Self::Remote { kind, .. } => Some(*kind),
			_ => None,
		}
	}
}

/// Transport that delivers an envelope to a peer and returns its answer.
#[async_trait]
pub trait PeerClient: Send + Sync {
	async fn send(
		&self,
		peer: &str,
		envelope: FederationEnvelope,
	) -> Result<FederationResponse, FederationError>;
}

/// Receiving side of the protocol.
///
/// Handlers always answer; failures are encoded as
/// [`FederationResponse::Error`].
#[async_trait]
pub trait FederationHandler: Send + Sync {
	async fn handle(&self, envelope: FederationEnvelope) -> FederationResponse;
}
