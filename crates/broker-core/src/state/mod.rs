//! Order state management.
//!
//! Provides the transitioner that moves orders between registry
//! collections while keeping state and membership consistent.

pub mod transitioner;

pub use transitioner::{OrderStateTransitioner, TransitionError};
