//! Builder pattern for constructing broker engines.
//!
//! Composes a [`BrokerEngine`] from the configuration and factory maps for
//! storage backends and cloud plugins. The federation transport, the peer
//! authorizer and the reachability probe default to their production
//! implementations and can be replaced, which is how tests wire several
//! brokers into one process.

use crate::connector::{CloudConnector, ConnectorFactory, LocalConnector};
use crate::controller::OrderController;
use crate::engine::BrokerEngine;
use crate::federation::RemoteFacade;
use crate::registry::OrderRegistry;
use crate::state::OrderStateTransitioner;
use crate::workers::{EventNotifier, ReachabilityProbe, TcpReachabilityProbe, WorkerContext};
use broker_cloud::{CloudError, CloudPlugin, CloudService};
use broker_config::Config;
use broker_federation::{
	AllowListAuthorizer, FederationClient, HttpPeerClient, PeerAuthorizer, PeerClient,
};
use broker_storage::{OrderPersistence, StorageError, StorageInterface, StoragePersistence, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during broker engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions keyed by implementation name.
pub struct BrokerFactories<SF, CF> {
	pub storage_factories: HashMap<String, SF>,
	pub cloud_factories: HashMap<String, CF>,
}

pub struct BrokerBuilder {
	config: Config,
	peer_client: Option<Arc<dyn PeerClient>>,
	authorizer: Option<Arc<dyn PeerAuthorizer>>,
	probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl BrokerBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			peer_client: None,
			authorizer: None,
			probe: None,
		}
	}

	/// Transport used to reach peers instead of HTTP.
	pub fn with_peer_client(mut self, peer_client: Arc<dyn PeerClient>) -> Self {
		self.peer_client = Some(peer_client);
		self
	}

	pub fn with_authorizer(mut self, authorizer: Arc<dyn PeerAuthorizer>) -> Self {
		self.authorizer = Some(authorizer);
		self
	}

	pub fn with_reachability_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
		self.probe = Some(probe);
		self
	}

	pub fn build<SF, CF>(self, factories: BrokerFactories<SF, CF>) -> Result<BrokerEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		CF: Fn(&toml::Value) -> Result<Box<dyn CloudPlugin>, CloudError>,
	{
		let provider_id = self.config.broker.provider_id.clone();

		// Storage
		let primary = &self.config.storage.primary;
		let storage_config = self.config.storage.implementations.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Primary storage '{}' is not configured", primary))
		})?;
		let storage_factory = factories.storage_factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("storage implementation '{}'", primary))
		})?;
		let backend = storage_factory(storage_config).map_err(|e| {
			tracing::error!(component = "storage", implementation = %primary, error = %e, "Failed to create storage implementation");
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary, e
			))
		})?;
		tracing::info!(component = "storage", implementation = %primary, "Loaded");
		let persistence: Arc<dyn OrderPersistence> =
			Arc::new(StoragePersistence::new(StorageService::new(backend)));

		// Clouds
		let mut clouds: HashMap<String, Box<dyn CloudPlugin>> = HashMap::new();
		for (name, cloud_config) in &self.config.clouds.implementations {
			let plugin = self.config.clouds.plugin_for(name).unwrap_or(name.as_str());
			let factory = factories.cloud_factories.get(plugin).ok_or_else(|| {
				BuilderError::MissingComponent(format!("cloud plugin '{}' for cloud '{}'", plugin, name))
			})?;
			match factory(cloud_config) {
				Ok(implementation) => {
					let is_default = &self.config.clouds.default == name;
					tracing::info!(component = "cloud", implementation = %plugin, cloud = %name, default = %is_default, "Loaded");
					clouds.insert(name.clone(), implementation);
				},
				Err(e) => {
					tracing::error!(component = "cloud", cloud = %name, error = %e, "Failed to create cloud plugin");
					return Err(BuilderError::Config(format!(
						"Failed to create cloud '{}': {}",
						name, e
					)));
				},
			}
		}
		if !clouds.contains_key(&self.config.clouds.default) {
			return Err(BuilderError::Config(format!(
				"Default cloud '{}' failed to load",
				self.config.clouds.default
			)));
		}
		let clouds = Arc::new(CloudService::new(clouds, self.config.clouds.default.clone()));

		// Federation
		let transport = match self.peer_client {
			Some(transport) => Some(transport),
			None if self.config.federation.peers.is_empty() => None,
			None => {
				let peers = self
					.config
					.federation
					.peers
					.iter()
					.map(|(id, peer)| (id.clone(), peer.url.clone()))
					.collect();
				let client = HttpPeerClient::new(peers, self.config.federation.request_timeout())
					.map_err(|e| BuilderError::Config(format!("Failed to create peer client: {}", e)))?;
				tracing::info!(component = "federation", peers = self.config.federation.peers.len(), "Loaded");
				Some(Arc::new(client) as Arc<dyn PeerClient>)
			},
		};
		let federation = transport.map(|t| FederationClient::new(provider_id.clone(), t));
		let authorizer = self
			.authorizer
			.unwrap_or_else(|| {
				Arc::new(AllowListAuthorizer::new(self.config.federation.trusted())) as Arc<dyn PeerAuthorizer>
			});

		// Core
		let registry = Arc::new(OrderRegistry::new(provider_id.clone()));
		let transitioner = Arc::new(OrderStateTransitioner::new(
			registry.clone(),
			persistence.clone(),
		));
		let local: Arc<dyn CloudConnector> = Arc::new(LocalConnector::new(clouds));
		let connectors = Arc::new(ConnectorFactory::new(
			provider_id.clone(),
			local,
			federation.clone(),
		));
		let context = Arc::new(WorkerContext {
			registry: registry.clone(),
			transitioner: transitioner.clone(),
			connectors: connectors.clone(),
			notifier: Arc::new(EventNotifier::new(provider_id, federation.clone())),
			persistence,
			federation,
			probe: self
				.probe
				.unwrap_or_else(|| Arc::new(TcpReachabilityProbe::default()) as Arc<dyn ReachabilityProbe>),
		});
		let controller = Arc::new(OrderController::new(
			registry.clone(),
			transitioner.clone(),
			connectors,
		));
		let facade = Arc::new(RemoteFacade::new(
			registry,
			transitioner,
			controller.clone(),
			authorizer,
		));

		Ok(BrokerEngine::new(self.config, context, controller, facade))
	}
}
