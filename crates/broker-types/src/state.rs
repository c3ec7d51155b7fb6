//! Order lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an order.
///
/// OPEN, PENDING, SPAWNING and FULFILLED are actively polled. The failure
/// states are terminal unless an operator retries the order. Success of
/// CHECKING_DELETION removes the order from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
	Open,
	Pending,
	Spawning,
	Fulfilled,
	FailedOnRequest,
	FailedAfterSuccessfulRequest,
	UnableToCheckStatus,
	AssignedForDeletion,
	CheckingDeletion,
}

impl OrderState {
	/// Returns an iterator over all states.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Open,
			Self::Pending,
			Self::Spawning,
			Self::Fulfilled,
			Self::FailedOnRequest,
			Self::FailedAfterSuccessfulRequest,
			Self::UnableToCheckStatus,
			Self::AssignedForDeletion,
			Self::CheckingDeletion,
		]
		.into_iter()
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Open => "OPEN",
			Self::Pending => "PENDING",
			Self::Spawning => "SPAWNING",
			Self::Fulfilled => "FULFILLED",
			Self::FailedOnRequest => "FAILED_ON_REQUEST",
			Self::FailedAfterSuccessfulRequest => "FAILED_AFTER_SUCCESSFUL_REQUEST",
			Self::UnableToCheckStatus => "UNABLE_TO_CHECK_STATUS",
			Self::AssignedForDeletion => "ASSIGNED_FOR_DELETION",
			Self::CheckingDeletion => "CHECKING_DELETION",
		}
	}

	/// True for the failure states no worker advances automatically.
	pub fn is_failure(&self) -> bool {
		matches!(
			self,
			Self::FailedOnRequest | Self::FailedAfterSuccessfulRequest | Self::UnableToCheckStatus
		)
	}

	/// True once the order has entered the deletion pipeline.
	pub fn is_deleting(&self) -> bool {
		matches!(self, Self::AssignedForDeletion | Self::CheckingDeletion)
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderState {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|state| state.as_str() == s)
			.ok_or_else(|| format!("Unknown order state: {}", s))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_wire_names_match_display() {
		for state in OrderState::all() {
			let json = serde_json::to_string(&state).unwrap();
			assert_eq!(json, format!("\"{}\"", state));
			assert_eq!(state.as_str().parse::<OrderState>().unwrap(), state);
		}
	}

	#[test]
	fn test_failure_and_deletion_classification() {
		assert!(OrderState::UnableToCheckStatus.is_failure());
		assert!(!OrderState::Fulfilled.is_failure());
		assert!(OrderState::CheckingDeletion.is_deleting());
		assert!(!OrderState::Open.is_deleting());
	}
}
