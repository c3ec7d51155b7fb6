//! Lifecycle management for the broker engine.
//!
//! Startup rebuilds the registry from the persistence gateway; shutdown
//! cancels the workers and waits for their in-flight order.

use super::{BrokerEngine, EngineError};
use crate::registry::CollectionKey;
use broker_types::OrderState;

impl BrokerEngine {
	/// Rebuilds the registry. A gateway failure aborts startup.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(provider = %self.registry.local_provider(), "Initializing broker engine");

		let loaded = self
			.registry
			.rebuild(self.persistence.as_ref())
			.await
			.map_err(|e| EngineError::Initialization(e.to_string()))?;

		let sizes = self.registry.collection_sizes();
		let open = sizes
			.get(&CollectionKey::State(OrderState::Open))
			.copied()
			.unwrap_or_default();
		tracing::info!(orders = loaded, open, "Registry rebuilt");
		Ok(())
	}

	/// Cancels the workers and waits for them to stop.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down broker engine");
		self.cancel.cancel();

		let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
		for result in futures::future::join_all(tasks).await {
			if let Err(e) = result {
				tracing::error!(error = %e, "Worker task failed");
			}
		}
		Ok(())
	}
}
