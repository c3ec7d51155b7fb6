//! Broker engine that owns the order lifecycle.
//!
//! The engine holds the registry, the transitioner and every service the
//! phase workers need. It runs one task per worker until cancelled or
//! interrupted, and exposes the controller and the federation handler to
//! the outer surfaces.

pub mod lifecycle;

use crate::controller::OrderController;
use crate::federation::RemoteFacade;
use crate::registry::OrderRegistry;
use crate::state::OrderStateTransitioner;
use crate::workers::{WorkerContext, WorkerSet};
use broker_config::Config;
use broker_federation::FederationHandler;
use broker_storage::OrderPersistence;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Initialization error: {0}")]
	Initialization(String),
	#[error("Service error: {0}")]
	Service(String),
}

pub struct BrokerEngine {
	config: Config,
	registry: Arc<OrderRegistry>,
	transitioner: Arc<OrderStateTransitioner>,
	persistence: Arc<dyn OrderPersistence>,
	controller: Arc<OrderController>,
	facade: Arc<RemoteFacade>,
	context: Arc<WorkerContext>,
	cancel: CancellationToken,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerEngine {
	pub fn new(
		config: Config,
		context: Arc<WorkerContext>,
		controller: Arc<OrderController>,
		facade: Arc<RemoteFacade>,
	) -> Self {
		Self {
			config,
			registry: context.registry.clone(),
			transitioner: context.transitioner.clone(),
			persistence: context.persistence.clone(),
			controller,
			facade,
			context,
			cancel: CancellationToken::new(),
			tasks: Mutex::new(Vec::new()),
		}
	}

	/// Main execution loop: spawns the workers and waits for Ctrl+C or
	/// cancellation, then shuts down.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.spawn_workers();

		tokio::select! {
			result = tokio::signal::ctrl_c() => {
				result.map_err(|e| EngineError::Service(format!("Failed to listen for Ctrl+C: {}", e)))?;
				tracing::info!("Interrupt received");
			}
			_ = self.cancel.cancelled() => {}
		}

		self.shutdown().await
	}

	/// Starts one task per phase worker.
	pub fn spawn_workers(&self) {
		let handles = self.workers().spawn(&self.cancel);
		tracing::info!(count = handles.len(), "Workers started");
		self.tasks.lock().extend(handles);
	}

	/// Workers bound to this engine, for callers that drive passes
	/// themselves.
	pub fn workers(&self) -> WorkerSet {
		WorkerSet::new(self.context.clone(), &self.config.workers)
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn registry(&self) -> &Arc<OrderRegistry> {
		&self.registry
	}

	pub fn transitioner(&self) -> &Arc<OrderStateTransitioner> {
		&self.transitioner
	}

	pub fn persistence(&self) -> &Arc<dyn OrderPersistence> {
		&self.persistence
	}

	pub fn controller(&self) -> &Arc<OrderController> {
		&self.controller
	}

	/// Handler serving requests from federation peers.
	pub fn federation_handler(&self) -> Arc<dyn FederationHandler> {
		self.facade.clone()
	}

	/// Token that stops the workers and `run` when cancelled.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}
}
