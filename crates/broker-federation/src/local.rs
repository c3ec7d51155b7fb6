//! In-process federation transport.
//!
//! Routes envelopes directly to [`FederationHandler`]s registered by
//! provider id. Handlers are held weakly so a broker that owns a client on
//! the same network can be dropped normally.

use crate::{
	FederationEnvelope, FederationError, FederationHandler, FederationResponse, PeerClient,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Default)]
pub struct InProcessNetwork {
	handlers: RwLock<HashMap<String, Weak<dyn FederationHandler>>>,
}

impl InProcessNetwork {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes `handler` reachable as `provider_id`, replacing any earlier one.
	pub fn register(&self, provider_id: impl Into<String>, handler: &Arc<dyn FederationHandler>) {
		self.handlers
			.write()
			.insert(provider_id.into(), Arc::downgrade(handler));
	}

	pub fn unregister(&self, provider_id: &str) {
		self.handlers.write().remove(provider_id);
	}

	fn handler(&self, peer: &str) -> Result<Arc<dyn FederationHandler>, FederationError> {
		self.handlers
			.read()
			.get(peer)
			.and_then(Weak::upgrade)
			.ok_or_else(|| FederationError::UnknownPeer(peer.to_string()))
	}
}

#[async_trait]
impl PeerClient for InProcessNetwork {
	async fn send(
		&self,
		peer: &str,
		envelope: FederationEnvelope,
	) -> Result<FederationResponse, FederationError> {
		let handler = self.handler(peer)?;
		Ok(handler.handle(envelope).await)
	}
}
