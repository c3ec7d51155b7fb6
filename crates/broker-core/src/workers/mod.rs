//! Phase workers driving orders through the lifecycle.
//!
//! Each worker owns one registry collection and walks it with the
//! collection's cursor, one order per pass. The walk itself is generic
//! ([`PhaseWorker`]); what happens to an order is decided by a
//! [`PhaseProcessor`]. Cloud and peer calls run on a snapshot with no lock
//! held, and every state change goes through the transitioner.

mod deletion;
mod fulfilled;
mod notifier;
mod open;
mod reachability;
mod reconciliation;
mod spawning;

pub use deletion::{AssignedForDeletionProcessor, CheckingDeletionProcessor};
pub use fulfilled::FulfilledProcessor;
pub use notifier::EventNotifier;
pub use open::OpenProcessor;
pub use reachability::{ReachabilityProbe, TcpReachabilityProbe};
pub use reconciliation::ReconciliationProcessor;
pub use spawning::SpawningProcessor;

use crate::connector::{ConnectorError, ConnectorFactory};
use crate::registry::{CollectionKey, OrderHandle, OrderRegistry};
use crate::state::{OrderStateTransitioner, TransitionError};
use async_trait::async_trait;
use broker_config::WorkerConfig;
use broker_federation::{FederationClient, FederationError};
use broker_storage::OrderPersistence;
use broker_types::{truncate_id, Order, OrderState};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Errors raised while processing one order.
#[derive(Debug, Error)]
pub enum WorkerError {
	#[error("Connector error: {0}")]
	Connector(#[from] ConnectorError),
	#[error("Transition error: {0}")]
	Transition(#[from] TransitionError),
	#[error("Federation error: {0}")]
	Federation(#[from] FederationError),
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Services shared by every processor.
pub struct WorkerContext {
	pub registry: Arc<OrderRegistry>,
	pub transitioner: Arc<OrderStateTransitioner>,
	pub connectors: Arc<ConnectorFactory>,
	pub notifier: Arc<EventNotifier>,
	pub persistence: Arc<dyn OrderPersistence>,
	pub federation: Option<FederationClient>,
	pub probe: Arc<dyn ReachabilityProbe>,
}

impl WorkerContext {
	pub fn local_provider(&self) -> &str {
		self.registry.local_provider()
	}

	/// Federation client, required by workers that talk to peers directly.
	pub fn federation(&self) -> Result<&FederationClient, WorkerError> {
		self.federation
			.as_ref()
			.ok_or_else(|| WorkerError::Config("Federation is not configured".into()))
	}

	/// Conditional transition followed by the requester notification.
	///
	/// Returns `false` when the order left `expected` in the meantime.
	pub async fn advance<F>(
		&self,
		handle: &OrderHandle,
		expected: OrderState,
		new_state: OrderState,
		update: F,
	) -> Result<bool, WorkerError>
	where
		F: FnOnce(&mut Order) + Send,
	{
		match self
			.transitioner
			.transition_if(handle, expected, new_state, update)
			.await?
		{
			Some(order) => {
				self.notifier.notify(&order).await;
				Ok(true)
			},
			None => Ok(false),
		}
	}
}

/// What one phase does with an order of its collection.
#[async_trait]
pub trait PhaseProcessor: Send + Sync {
	/// Worker name used in logs.
	fn name(&self) -> &'static str;

	/// Collection the worker walks.
	fn source(&self) -> CollectionKey;

	/// Re-check done under the order lock before processing.
	fn accepts(&self, order: &Order) -> bool {
		match self.source() {
			CollectionKey::State(state) => order.state == state,
			CollectionKey::Remote => true,
		}
	}

	/// Handles one snapshot.
	async fn process(&self, handle: &OrderHandle, order: Order) -> Result<(), WorkerError>;

	/// State an order is moved to when `process` fails or panics. `None`
	/// keeps the order where it is so the next pass retries.
	///
	/// The deletion and reconciliation phases return `None`: an order on its
	/// way out is retried until its instance is released and never parked
	/// in a failure state, which would leak the instance.
	fn failure_state(&self) -> Option<OrderState> {
		None
	}

	/// Extra wait after a sweep that visited at least one order.
	fn sweep_pause(&self) -> Option<Duration> {
		None
	}
}

/// Result of one [`PhaseWorker::poll_once`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
	/// The order was handed to the processor.
	Processed(String),
	/// The order no longer matched the phase.
	Skipped(String),
	/// The cursor reached the tail and was rewound. `visited` counts the
	/// orders seen during the finished sweep.
	SweepDone { visited: usize },
}

/// Generic polling loop over one collection.
pub struct PhaseWorker<P> {
	processor: P,
	context: Arc<WorkerContext>,
	idle_sleep: Duration,
	visited: AtomicUsize,
}

impl<P: PhaseProcessor> PhaseWorker<P> {
	pub fn new(processor: P, context: Arc<WorkerContext>, idle_sleep: Duration) -> Self {
		Self {
			processor,
			context,
			idle_sleep,
			visited: AtomicUsize::new(0),
		}
	}

	pub fn processor(&self) -> &P {
		&self.processor
	}

	/// Takes the next order off the cursor and processes it.
	pub async fn poll_once(&self) -> Result<PollOutcome, WorkerError> {
		let collection = self
			.context
			.registry
			.collection(self.processor.source())
			.map_err(|e| WorkerError::Config(e.to_string()))?;

		let Some(handle) = collection.next() else {
			collection.reset();
			let visited = self.visited.swap(0, Ordering::Relaxed);
			return Ok(PollOutcome::SweepDone { visited });
		};
		self.visited.fetch_add(1, Ordering::Relaxed);

		let snapshot = {
			let order = handle.lock();
			self.processor.accepts(&order).then(|| order.clone())
		};
		let Some(order) = snapshot else {
			return Ok(PollOutcome::Skipped(handle.id().to_string()));
		};

		self.process(&handle, order).await;
		Ok(PollOutcome::Processed(handle.id().to_string()))
	}

	#[instrument(skip_all, fields(worker = self.processor.name(), order_id = %truncate_id(&order.id)))]
	async fn process(&self, handle: &OrderHandle, order: Order) {
		let state = order.state;
		let outcome = AssertUnwindSafe(self.processor.process(handle, order))
			.catch_unwind()
			.await;
		let fault = match outcome {
			Ok(Ok(())) => return,
			Ok(Err(e)) => {
				tracing::warn!(state = %state, error = %e, "Failed to process order");
				e.to_string()
			},
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				tracing::error!(state = %state, panic = %message, "Order processing panicked");
				format!("Processing panicked: {}", message)
			},
		};

		let Some(failure) = self.processor.failure_state() else {
			return;
		};
		match self
			.context
			.advance(handle, state, failure, move |o| o.fault_message = Some(fault))
			.await
		{
			Ok(true) => tracing::info!(state = %failure, "Order failed"),
			Ok(false) => {},
			Err(e) => tracing::error!(error = %e, "Failed to record order failure"),
		}
	}

	/// Polls until cancelled. The order in flight is finished first.
	pub async fn run(self, cancel: CancellationToken) {
		let name = self.processor.name();
		tracing::info!(worker = name, "Worker started");
		while !cancel.is_cancelled() {
			let pause = match self.poll_once().await {
				Ok(PollOutcome::SweepDone { visited }) => match self.processor.sweep_pause() {
					Some(pause) if visited > 0 => pause,
					_ => self.idle_sleep,
				},
				Ok(_) => {
					tokio::task::yield_now().await;
					continue;
				},
				Err(e) => {
					tracing::error!(worker = name, error = %e, "Worker pass failed");
					self.idle_sleep
				},
			};
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = tokio::time::sleep(pause) => {},
			}
		}
		tracing::info!(worker = name, "Worker stopped");
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}

/// One worker per phase, sharing one context.
pub struct WorkerSet {
	pub open: PhaseWorker<OpenProcessor>,
	pub spawning: PhaseWorker<SpawningProcessor>,
	pub fulfilled: PhaseWorker<FulfilledProcessor>,
	pub assigned_for_deletion: PhaseWorker<AssignedForDeletionProcessor>,
	pub checking_deletion: PhaseWorker<CheckingDeletionProcessor>,
	pub reconciliation: PhaseWorker<ReconciliationProcessor>,
}

impl WorkerSet {
	pub fn new(context: Arc<WorkerContext>, config: &WorkerConfig) -> Self {
		Self {
			open: PhaseWorker::new(
				OpenProcessor::new(context.clone()),
				context.clone(),
				config.open_sleep(),
			),
			spawning: PhaseWorker::new(
				SpawningProcessor::new(context.clone()),
				context.clone(),
				config.spawning_sleep(),
			),
			fulfilled: PhaseWorker::new(
				FulfilledProcessor::new(context.clone()),
				context.clone(),
				config.fulfilled_sleep(),
			),
			assigned_for_deletion: PhaseWorker::new(
				AssignedForDeletionProcessor::new(context.clone()),
				context.clone(),
				config.deletion_sleep(),
			),
			checking_deletion: PhaseWorker::new(
				CheckingDeletionProcessor::new(context.clone()),
				context.clone(),
				config.deletion_sleep(),
			),
			reconciliation: PhaseWorker::new(
				ReconciliationProcessor::new(context.clone(), config.reconciliation_interval()),
				context,
				config.reconciliation_sleep(),
			),
		}
	}

	/// Runs one pass of every worker in lifecycle order.
	pub async fn poll_once_each(&self) -> Vec<Result<PollOutcome, WorkerError>> {
		vec![
			self.open.poll_once().await,
			self.spawning.poll_once().await,
			self.fulfilled.poll_once().await,
			self.assigned_for_deletion.poll_once().await,
			self.checking_deletion.poll_once().await,
			self.reconciliation.poll_once().await,
		]
	}

	/// Spawns one task per worker.
	pub fn spawn(self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
		vec![
			tokio::spawn(self.open.run(cancel.child_token())),
			tokio::spawn(self.spawning.run(cancel.child_token())),
			tokio::spawn(self.fulfilled.run(cancel.child_token())),
			tokio::spawn(self.assigned_for_deletion.run(cancel.child_token())),
			tokio::spawn(self.checking_deletion.run(cancel.child_token())),
			tokio::spawn(self.reconciliation.run(cancel.child_token())),
		]
	}
}
