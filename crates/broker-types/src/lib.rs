//! Common types module for the resource-allocation broker.
//!
//! This module defines the core data types shared by every broker component:
//! orders and their lifecycle states, provider-side instance views, quotas,
//! storage keys and configuration validation helpers.

/// Provider-side instance, quota and image types.
pub mod instance;
/// Orders, resource payloads and federated user identities.
pub mod order;
/// Base trait for self-registering implementations.
pub mod registry;
/// Order lifecycle states.
pub mod state;
/// Storage types for managing persistent data.
pub mod storage;
/// Utility functions for formatting and time.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use instance::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use state::OrderState;
pub use storage::*;
pub use utils::{current_timestamp, truncate_id};
pub use validation::*;
