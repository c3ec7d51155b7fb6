//! Peer authorization.

use crate::{FederationError, FederationRequest};
use std::collections::HashSet;

/// Decides whether a sender may issue a request at all.
///
/// Order-scoped ownership checks need the local order and are done by the
/// receiving handler after this check passed.
pub trait PeerAuthorizer: Send + Sync {
	fn authorize(&self, sender: &str, request: &FederationRequest) -> Result<(), FederationError>;
}

/// Accepts requests only from a fixed set of providers.
pub struct AllowListAuthorizer {
	trusted: HashSet<String>,
}

impl AllowListAuthorizer {
	pub fn new(trusted: impl IntoIterator<Item = String>) -> Self {
		Self {
			trusted: trusted.into_iter().collect(),
		}
	}
}

impl PeerAuthorizer for AllowListAuthorizer {
	fn authorize(&self, sender: &str, request: &FederationRequest) -> Result<(), FederationError> {
		if self.trusted.contains(sender) {
			Ok(())
		} else {
			Err(FederationError::Authorization(format!(
				"Provider '{}' is not trusted for {}",
				sender,
				request.kind()
			)))
		}
	}
}
