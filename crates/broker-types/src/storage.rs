//! Storage-related types for the broker.

use crate::OrderState;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Storage keys for different data collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Latest snapshot of every live order
	Orders,
	/// Append-only state change records
	StateChanges,
	/// Reconciliation bookkeeping
	SyncRequests,
	/// Tombstones of removed orders
	Removals,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::StateChanges => "state_changes",
			StorageKey::SyncRequests => "sync_requests",
			StorageKey::Removals => "removals",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::StateChanges,
			Self::SyncRequests,
			Self::Removals,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"state_changes" => Ok(Self::StateChanges),
			"sync_requests" => Ok(Self::SyncRequests),
			"removals" => Ok(Self::Removals),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}

/// Audit record written after every successful state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeRecord {
	pub order_id: String,
	/// State before the transition, `None` for activation.
	pub from: Option<OrderState>,
	pub to: OrderState,
	/// Order version the transition produced.
	#[serde(default)]
	pub version: u64,
	pub timestamp: u64,
}

/// Tombstone left when an order is removed. Snapshots up to `version`
/// are never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRecord {
	pub order_id: String,
	pub version: u64,
	pub timestamp: u64,
}

/// Outcome of one reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
	/// Remote state matched the local mirror.
	InSync,
	/// The local mirror was corrected.
	Updated,
	/// The peer no longer knows the order.
	Gone,
	/// The peer could not be queried.
	Failed,
	/// The peer still hosted a deleted order and was asked again.
	DeletionResent,
}

/// Bookkeeping entry for a reconciliation request sent to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
	pub order_id: String,
	pub peer: String,
	pub local_state: OrderState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_state: Option<OrderState>,
	pub outcome: SyncOutcome,
	pub timestamp: u64,
}
