//! HTTP server for the federation endpoint.
//!
//! Peers post [`FederationEnvelope`]s to `/federation` and receive the
//! handler's [`FederationResponse`] as JSON. `/health` reports the local
//! provider and the registry size.

use axum::{extract::State, response::Json, routing::{get, post}, Router};
use broker_config::ApiConfig;
use broker_core::BrokerEngine;
use broker_federation::http::FEDERATION_PATH;
use broker_federation::{FederationEnvelope, FederationHandler, FederationResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub broker: Arc<BrokerEngine>,
	pub handler: Arc<dyn FederationHandler>,
}

pub fn router(broker: Arc<BrokerEngine>) -> Router {
	let state = AppState {
		handler: broker.federation_handler(),
		broker,
	};
	Router::new()
		.route(FEDERATION_PATH, post(handle_federation))
		.route("/health", get(handle_health))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

/// Serves the endpoint until the listener fails.
pub async fn start_server(
	api_config: ApiConfig,
	broker: Arc<BrokerEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!("Federation endpoint listening on {}", bind_address);

	axum::serve(listener, router(broker)).await?;
	Ok(())
}

async fn handle_federation(
	State(state): State<AppState>,
	Json(envelope): Json<FederationEnvelope>,
) -> Json<FederationResponse> {
	Json(state.handler.handle(envelope).await)
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
	let registry = state.broker.registry();
	Json(json!({
		"status": "ok",
		"provider": registry.local_provider(),
		"orders": registry.len(),
	}))
}
