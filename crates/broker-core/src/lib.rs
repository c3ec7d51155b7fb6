//! Core broker engine for the resource-allocation broker.
//!
//! This crate keeps the authoritative in-memory view of every order the
//! broker knows about, moves orders through their lifecycle with one phase
//! worker per state, and talks to clouds and federation peers through
//! connectors. The [`BrokerBuilder`] wires these pieces into a
//! [`BrokerEngine`] from configuration.

pub mod builder;
pub mod connector;
pub mod controller;
pub mod engine;
pub mod federation;
pub mod registry;
pub mod state;
pub mod workers;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod test_support;

pub use builder::{BrokerBuilder, BrokerFactories, BuilderError};
pub use connector::{CloudConnector, ConnectorError, ConnectorFactory};
pub use controller::{ControllerError, OrderController};
pub use engine::{BrokerEngine, EngineError};
pub use federation::RemoteFacade;
pub use registry::{CollectionKey, OrderHandle, OrderRegistry, RegistryError};
pub use state::{OrderStateTransitioner, TransitionError};
pub use workers::{PollOutcome, WorkerError, WorkerSet};
