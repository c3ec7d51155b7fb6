//! HTTP federation transport.
//!
//! Envelopes are posted as JSON to `<peer url>/federation`. Protocol-level
//! failures travel inside a [`FederationResponse::Error`]; anything that
//! does not decode as a response is reported as a transport error.

use crate::{FederationEnvelope, FederationError, FederationResponse, PeerClient};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub const FEDERATION_PATH: &str = "/federation";

pub struct HttpPeerClient {
	client: reqwest::Client,
	/// Base URL of every known peer.
	peers: HashMap<String, String>,
}

impl HttpPeerClient {
	pub fn new(peers: HashMap<String, String>, timeout: Duration) -> Result<Self, FederationError> {
		let client = reqwest::Client::builder()
			.pool_idle_timeout(Duration::from_secs(90))
			.pool_max_idle_per_host(10)
			.timeout(timeout)
			.build()
			.map_err(|e| FederationError::Transport(e.to_string()))?;
		Ok(Self { client, peers })
	}

	fn endpoint(&self, peer: &str) -> Result<String, FederationError> {
		let base = self
			.peers
			.get(peer)
			.ok_or_else(|| FederationError::UnknownPeer(peer.to_string()))?;
		Ok(format!("{}{}", base.trim_end_matches('/'), FEDERATION_PATH))
	}
}

#[async_trait]
impl PeerClient for HttpPeerClient {
	async fn send(
		&self,
		peer: &str,
		envelope: FederationEnvelope,
	) -> Result<FederationResponse, FederationError> {
		let url = self.endpoint(peer)?;

		let response = self
			.client
			.post(&url)
			.json(&envelope)
			.send()
			.await
			.map_err(|e| FederationError::Transport(e.to_string()))?;

		let status = response.status();
		let body = response
			.bytes()
			.await
			.map_err(|e| FederationError::Transport(e.to_string()))?;

		serde_json::from_slice::<FederationResponse>(&body).map_err(|e| {
			if status.is_success() {
				FederationError::Codec(e.to_string())
			} else {
				FederationError::Transport(format!("Peer {} answered with status {}", peer, status))
			}
		})
	}
}
