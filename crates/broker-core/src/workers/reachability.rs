//! Network reachability check for READY compute instances.

use async_trait::async_trait;
use broker_types::{Instance, ATTR_IP_ADDRESS, ATTR_SSH_PORT};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
	/// Whether the instance accepts connections yet.
	async fn is_reachable(&self, instance: &Instance) -> bool;
}

/// Probes by opening a TCP connection to the instance's address.
///
/// Instances that do not expose an address are treated as reachable.
pub struct TcpReachabilityProbe {
	default_port: u16,
	timeout: Duration,
}

impl Default for TcpReachabilityProbe {
	fn default() -> Self {
		Self::new(22, Duration::from_secs(3))
	}
}

impl TcpReachabilityProbe {
	pub fn new(default_port: u16, timeout: Duration) -> Self {
		Self {
			default_port,
			timeout,
		}
	}

	fn target(&self, instance: &Instance) -> Option<String> {
		let address = instance.attributes.get(ATTR_IP_ADDRESS)?;
		let port = instance
			.attributes
			.get(ATTR_SSH_PORT)
			.and_then(|p| p.parse::<u16>().ok())
			.unwrap_or(self.default_port);
		Some(match address.parse::<IpAddr>() {
			Ok(ip) => SocketAddr::new(ip, port).to_string(),
			Err(_) => format!("{}:{}", address, port),
		})
	}
}

#[async_trait]
impl ReachabilityProbe for TcpReachabilityProbe {
	async fn is_reachable(&self, instance: &Instance) -> bool {
		let Some(target) = self.target(instance) else {
			return true;
		};
		match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(target.as_str())).await {
			Ok(Ok(_)) => true,
			Ok(Err(e)) => {
				tracing::debug!(instance_id = %instance.id, target = %target, error = %e, "Instance not reachable");
				false
			},
			Err(_) => {
				tracing::debug!(instance_id = %instance.id, target = %target, "Reachability check timed out");
				false
			},
		}
	}
}
