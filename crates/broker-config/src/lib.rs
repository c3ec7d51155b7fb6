//! Configuration module for the resource-allocation broker.
//!
//! This module provides structures and utilities for managing broker
//! configuration. It supports loading configuration from TOML files and
//! validates that all required values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the broker.
///
/// Constructed once at startup and handed to whichever component needs
/// the local provider identity, worker intervals or plugin settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this broker instance.
	pub broker: BrokerConfig,
	/// Polling intervals of the phase workers.
	#[serde(default)]
	pub workers: WorkerConfig,
	/// Configuration for the persistence backend.
	pub storage: StorageConfig,
	/// Cloud plugins available on this provider.
	pub clouds: CloudsConfig,
	/// Federation peers and trust settings.
	#[serde(default)]
	pub federation: FederationConfig,
	/// Configuration for the federation HTTP endpoint.
	pub api: Option<ApiConfig>,
}

/// Identity of the local broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
	/// Provider id other peers use to address this instance.
	pub provider_id: String,
}

/// Idle sleep durations of each phase worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
	#[serde(default = "default_open_sleep_ms")]
	pub open_sleep_ms: u64,
	#[serde(default = "default_spawning_sleep_ms")]
	pub spawning_sleep_ms: u64,
	#[serde(default = "default_fulfilled_sleep_ms")]
	pub fulfilled_sleep_ms: u64,
	/// Shared by the ASSIGNED_FOR_DELETION and CHECKING_DELETION workers.
	#[serde(default = "default_deletion_sleep_ms")]
	pub deletion_sleep_ms: u64,
	#[serde(default = "default_reconciliation_sleep_ms")]
	pub reconciliation_sleep_ms: u64,
	/// Pause between two full reconciliation sweeps.
	#[serde(default = "default_reconciliation_interval_seconds")]
	pub reconciliation_interval_seconds: u64,
}

fn default_open_sleep_ms() -> u64 {
	1000
}

fn default_spawning_sleep_ms() -> u64 {
	5000
}

fn default_fulfilled_sleep_ms() -> u64 {
	10_000
}

fn default_deletion_sleep_ms() -> u64 {
	5000
}

fn default_reconciliation_sleep_ms() -> u64 {
	10_000
}

fn default_reconciliation_interval_seconds() -> u64 {
	60
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			open_sleep_ms: default_open_sleep_ms(),
			spawning_sleep_ms: default_spawning_sleep_ms(),
			fulfilled_sleep_ms: default_fulfilled_sleep_ms(),
			deletion_sleep_ms: default_deletion_sleep_ms(),
			reconciliation_sleep_ms: default_reconciliation_sleep_ms(),
			reconciliation_interval_seconds: default_reconciliation_interval_seconds(),
		}
	}
}

impl WorkerConfig {
	pub fn open_sleep(&self) -> Duration {
		Duration::from_millis(self.open_sleep_ms)
	}

	pub fn spawning_sleep(&self) -> Duration {
		Duration::from_millis(self.spawning_sleep_ms)
	}

	pub fn fulfilled_sleep(&self) -> Duration {
		Duration::from_millis(self.fulfilled_sleep_ms)
	}

	pub fn deletion_sleep(&self) -> Duration {
		Duration::from_millis(self.deletion_sleep_ms)
	}

	pub fn reconciliation_sleep(&self) -> Duration {
		Duration::from_millis(self.reconciliation_sleep_ms)
	}

	pub fn reconciliation_interval(&self) -> Duration {
		Duration::from_secs(self.reconciliation_interval_seconds)
	}
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Cloud plugins reachable from this provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudsConfig {
	/// Cloud used when an order names none.
	pub default: String,
	/// Map of cloud names to plugin configurations. Each entry names its
	/// plugin through a `plugin` key.
	pub implementations: HashMap<String, toml::Value>,
}

impl CloudsConfig {
	/// Plugin kind of a configured cloud, defaulting to the cloud's own name.
	pub fn plugin_for<'a>(&'a self, cloud_name: &'a str) -> Option<&'a str> {
		self.implementations.get(cloud_name).map(|value| {
			value
				.get("plugin")
				.and_then(|v| v.as_str())
				.unwrap_or(cloud_name)
		})
	}
}

/// Federation settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FederationConfig {
	/// Peers allowed to send federation requests. Empty means every peer
	/// listed in `peers` is trusted.
	#[serde(default)]
	pub trusted_peers: Vec<String>,
	/// Timeout of a single federation request in seconds.
	#[serde(default = "default_request_timeout_seconds")]
	pub request_timeout_seconds: u64,
	/// Known peers by provider id.
	#[serde(default)]
	pub peers: HashMap<String, PeerConfig>,
}

impl FederationConfig {
	/// Providers accepted as senders of federation requests.
	pub fn trusted(&self) -> Vec<String> {
		if self.trusted_peers.is_empty() {
			self.peers.keys().cloned().collect()
		} else {
			self.trusted_peers.clone()
		}
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_seconds)
	}
}

fn default_request_timeout_seconds() -> u64 {
	30
}

/// Address of one federation peer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerConfig {
	/// Base URL of the peer's federation endpoint.
	pub url: String,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	8080
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following include directives.
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Minimal valid configuration for tests: memory storage, one simulated
	/// cloud and no peers.
	#[cfg(any(test, feature = "testing"))]
	pub fn for_testing(provider_id: &str) -> Self {
		let mut storage = HashMap::new();
		storage.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);
		let mut clouds = HashMap::new();
		let mut cloud = toml::map::Map::new();
		cloud.insert(
			"plugin".to_string(),
			toml::Value::String("simulated".to_string()),
		);
		clouds.insert("default".to_string(), toml::Value::Table(cloud));

		Self {
			broker: BrokerConfig {
				provider_id: provider_id.to_string(),
			},
			workers: WorkerConfig {
				open_sleep_ms: 10,
				spawning_sleep_ms: 10,
				fulfilled_sleep_ms: 10,
				deletion_sleep_ms: 10,
				reconciliation_sleep_ms: 10,
				reconciliation_interval_seconds: 1,
			},
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations: storage,
			},
			clouds: CloudsConfig {
				default: "default".to_string(),
				implementations: clouds,
			},
			federation: FederationConfig::default(),
			api: None,
		}
	}

	/// Builds a configuration from an already merged TOML document.
	pub fn from_value(value: toml::Value) -> Result<Self, ConfigError> {
		let config: Config = value.try_into()?;
		config.validate()?;
		Ok(config)
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.broker.provider_id.trim().is_empty() {
			return Err(ConfigError::Validation(
				"Broker provider_id cannot be empty".into(),
			));
		}

		let sleeps = [
			("open_sleep_ms", self.workers.open_sleep_ms),
			("spawning_sleep_ms", self.workers.spawning_sleep_ms),
			("fulfilled_sleep_ms", self.workers.fulfilled_sleep_ms),
			("deletion_sleep_ms", self.workers.deletion_sleep_ms),
			("reconciliation_sleep_ms", self.workers.reconciliation_sleep_ms),
			(
				"reconciliation_interval_seconds",
				self.workers.reconciliation_interval_seconds,
			),
		];
		for (name, value) in sleeps {
			if value == 0 {
				return Err(ConfigError::Validation(format!(
					"Worker {} must be greater than 0",
					name
				)));
			}
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		if !self.clouds.implementations.contains_key(&self.clouds.default) {
			return Err(ConfigError::Validation(format!(
				"Default cloud '{}' not found in clouds.implementations",
				self.clouds.default
			)));
		}

		if self.federation.request_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"Federation request_timeout_seconds must be greater than 0".into(),
			));
		}
		if self.federation.peers.contains_key(&self.broker.provider_id) {
			return Err(ConfigError::Validation(format!(
				"Federation peers must not list the local provider '{}'",
				self.broker.provider_id
			)));
		}
		for peer in &self.federation.trusted_peers {
			if !self.federation.peers.contains_key(peer) {
				return Err(ConfigError::Validation(format!(
					"Trusted peer '{}' has no entry in federation.peers",
					peer
				)));
			}
		}

		Ok(())
	}
}

/// Parses configuration from a TOML string.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		Config::from_value(toml::from_str(&resolved)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: &str = r#"
[broker]
provider_id = "site-a"

[storage]
primary = "memory"
[storage.implementations.memory]

[clouds]
default = "openstack"
[clouds.implementations.openstack]
plugin = "simulated"
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("BROKER_TEST_HOST", "localhost");
		std::env::set_var("BROKER_TEST_PORT", "5432");

		let input = "host = \"${BROKER_TEST_HOST}:${BROKER_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("BROKER_TEST_HOST");
		std::env::remove_var("BROKER_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${BROKER_MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${BROKER_MISSING_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.unwrap_err().to_string().contains("BROKER_MISSING_VAR"));
	}

	#[test]
	fn test_minimal_config_gets_worker_defaults() {
		let config: Config = BASE.parse().unwrap();
		assert_eq!(config.broker.provider_id, "site-a");
		assert_eq!(config.workers.open_sleep(), Duration::from_millis(1000));
		assert_eq!(
			config.workers.reconciliation_interval(),
			Duration::from_secs(60)
		);
		assert_eq!(config.clouds.plugin_for("openstack"), Some("simulated"));
		assert!(config.federation.peers.is_empty());
	}

	#[test]
	fn test_federation_peers_and_trust() {
		let config_str = format!(
			"{}{}",
			BASE,
			r#"
[federation]
request_timeout_seconds = 5
[federation.peers.site-b]
url = "http://10.0.0.2:8080"
[federation.peers.site-c]
url = "http://10.0.0.3:8080"
"#
		);
		let config: Config = config_str.parse().unwrap();
		let mut trusted = config.federation.trusted();
		trusted.sort();
		assert_eq!(trusted, vec!["site-b".to_string(), "site-c".to_string()]);
		assert_eq!(config.federation.request_timeout(), Duration::from_secs(5));
	}

	#[test]
	fn test_local_provider_as_peer_rejected() {
		let config_str = format!(
			"{}{}",
			BASE,
			r#"
[federation.peers.site-a]
url = "http://127.0.0.1:8080"
"#
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("must not list the local provider"));
	}

	#[test]
	fn test_unknown_trusted_peer_rejected() {
		let config_str = format!(
			"{}{}",
			BASE,
			r#"
[federation]
trusted_peers = ["site-z"]
"#
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("site-z"));
	}

	#[test]
	fn test_zero_sleep_rejected() {
		let config_str = format!(
			"{}{}",
			BASE,
			r#"
[workers]
spawning_sleep_ms = 0
"#
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("spawning_sleep_ms"));
	}

	#[test]
	fn test_missing_default_cloud_rejected() {
		let config_str = r#"
[broker]
provider_id = "site-a"

[storage]
primary = "memory"
[storage.implementations.memory]

[clouds]
default = "aws"
[clouds.implementations.openstack]
"#;
		let err = Config::from_str(config_str).unwrap_err();
		assert!(err.to_string().contains("Default cloud 'aws'"));
	}

	#[test]
	fn test_testing_config_is_valid() {
		let config = Config::for_testing("site-a");
		assert!(config.validate().is_ok());
	}
}
