//! Main entry point for the resource-allocation broker.
//!
//! This binary loads the configuration, builds the broker engine with the
//! storage backends and cloud plugins it names, rebuilds the order
//! registry and runs the phase workers until interrupted. When enabled,
//! the federation endpoint is served alongside.

use broker_config::Config;
use broker_core::BrokerBuilder;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod factory_registry;
mod server;

/// Command-line arguments for the broker service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started broker");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.broker.provider_id);

	let factories = factory_registry::factories_for(&config)?;
	let broker = Arc::new(BrokerBuilder::new(config.clone()).build(factories)?);
	broker.initialize().await?;

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			let api_broker = Arc::clone(&broker);
			tokio::select! {
				result = broker.run() => {
					tracing::info!("Broker finished");
					result?;
				}
				result = server::start_server(api_config, api_broker) => {
					tracing::info!("Federation endpoint finished");
					result?;
					broker.shutdown().await?;
				}
			}
		},
		None => {
			tracing::info!("Starting broker without federation endpoint");
			broker.run().await?;
		},
	}

	tracing::info!("Stopped broker");
	Ok(())
}
