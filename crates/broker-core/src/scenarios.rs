//! End-to-end lifecycle tests over fully built engines.
//!
//! Brokers are built from configuration with the simulated cloud and are
//! federated over an [`InProcessNetwork`]. Workers are driven one sweep at
//! a time unless a test runs them as tasks.

use crate::builder::tests::factories;
use crate::builder::BrokerBuilder;
use crate::engine::BrokerEngine;
use crate::registry::CollectionKey;
use crate::test_support::{compute_order, volume_order, FixedProbe};
use crate::workers::{PhaseProcessor, PhaseWorker, PollOutcome};
use broker_config::Config;
use broker_federation::{AllowListAuthorizer, FederationHandler, InProcessNetwork, PeerAuthorizer};
use broker_types::{Order, OrderState};
use std::sync::Arc;
use std::time::Duration;

fn config(provider: &str, trusted: &[&str]) -> Config {
	let mut config = Config::for_testing(provider);
	config.federation.trusted_peers = trusted.iter().map(|p| p.to_string()).collect();
	config
}

fn broker(config: Config, network: &Arc<InProcessNetwork>, probe: &Arc<FixedProbe>) -> Arc<BrokerEngine> {
	let provider = config.broker.provider_id.clone();
	let engine = BrokerBuilder::new(config)
		.with_peer_client(network.clone())
		.with_reachability_probe(probe.clone())
		.build(factories())
		.unwrap();
	let handler: Arc<dyn FederationHandler> = engine.federation_handler();
	network.register(provider, &handler);
	Arc::new(engine)
}

fn standalone(config: Config, probe: &Arc<FixedProbe>) -> BrokerEngine {
	BrokerBuilder::new(config)
		.with_reachability_probe(probe.clone())
		.build(factories())
		.unwrap()
}

/// Polls until the worker finishes a full sweep.
async fn sweep<P: PhaseProcessor>(worker: &PhaseWorker<P>) -> usize {
	for _ in 0..64 {
		if let PollOutcome::SweepDone { visited } = worker.poll_once().await.unwrap() {
			return visited;
		}
	}
	panic!("{} never finished a sweep", worker.processor().name());
}

fn order_in(engine: &BrokerEngine, id: &str) -> Order {
	engine.controller().get_order(id).unwrap()
}

fn member_count(engine: &BrokerEngine, id: &str) -> usize {
	CollectionKey::all()
		.filter(|key| engine.registry().collection(*key).unwrap().contains(id))
		.count()
}

#[tokio::test]
async fn test_local_compute_is_spawned_then_fulfilled() {
	let probe = Arc::new(FixedProbe::new(false));
	let engine = standalone(Config::for_testing("site-a"), &probe);
	let workers = engine.workers();
	let id = engine
		.controller()
		.activate_order(compute_order("site-a", "site-a"))
		.await
		.unwrap();

	assert_eq!(sweep(&workers.open).await, 1);
	let spawning = order_in(&engine, &id);
	assert_eq!(spawning.state, OrderState::Spawning);
	assert!(spawning.instance_id.is_some());
	assert!(engine.registry().orders_list(OrderState::Spawning).unwrap().contains(&id));
	assert!(engine.registry().orders_list(OrderState::Open).unwrap().is_empty());

	// Ready but unreachable stays put.
	sweep(&workers.spawning).await;
	assert_eq!(order_in(&engine, &id).state, OrderState::Spawning);

	probe.set(true);
	sweep(&workers.spawning).await;
	let fulfilled = order_in(&engine, &id);
	assert_eq!(fulfilled.state, OrderState::Fulfilled);
	assert_eq!(fulfilled.instance_id, spawning.instance_id);
	assert_eq!(member_count(&engine, &id), 1);
}

#[tokio::test]
async fn test_volume_skips_reachability() {
	let probe = Arc::new(FixedProbe::new(false));
	let engine = standalone(Config::for_testing("site-a"), &probe);
	let workers = engine.workers();
	let id = engine
		.controller()
		.activate_order(volume_order("site-a", "site-a"))
		.await
		.unwrap();

	sweep(&workers.open).await;
	sweep(&workers.spawning).await;
	assert_eq!(order_in(&engine, &id).state, OrderState::Fulfilled);
}

#[tokio::test]
async fn test_rejected_request_fails_on_request() {
	let mut config = Config::for_testing("site-a");
	let quota: toml::Value = toml::from_str("plugin = \"simulated\"\n[quota]\ninstances = 0").unwrap();
	config.clouds.implementations.insert("default".into(), quota);
	let engine = standalone(config, &Arc::new(FixedProbe::new(true)));
	let workers = engine.workers();
	let id = engine
		.controller()
		.activate_order(compute_order("site-a", "site-a"))
		.await
		.unwrap();

	sweep(&workers.open).await;
	let failed = order_in(&engine, &id);
	assert_eq!(failed.state, OrderState::FailedOnRequest);
	assert!(failed.fault_message.unwrap().contains("quota"));
	assert!(engine.registry().orders_list(OrderState::Open).unwrap().is_empty());
	assert!(engine
		.registry()
		.orders_list(OrderState::FailedOnRequest)
		.unwrap()
		.contains(&id));
}

#[tokio::test]
async fn test_local_deletion_releases_instance() {
	let engine = standalone(Config::for_testing("site-a"), &Arc::new(FixedProbe::new(true)));
	let workers = engine.workers();
	let id = engine
		.controller()
		.activate_order(volume_order("site-a", "site-a"))
		.await
		.unwrap();
	sweep(&workers.open).await;
	sweep(&workers.spawning).await;
	assert!(engine.controller().get_instance(&id).await.is_ok());

	engine.controller().delete_order(&id).await.unwrap();
	sweep(&workers.assigned_for_deletion).await;
	assert_eq!(order_in(&engine, &id).state, OrderState::CheckingDeletion);
	sweep(&workers.checking_deletion).await;

	assert!(!engine.registry().contains(&id));
	assert!(engine.registry().verify_consistency().is_consistent());
}

#[tokio::test]
async fn test_remote_order_round_trip() {
	let network = Arc::new(InProcessNetwork::new());
	let probe = Arc::new(FixedProbe::new(true));
	let a = broker(config("site-a", &["site-b"]), &network, &probe);
	let b = broker(config("site-b", &["site-a"]), &network, &probe);
	let (wa, wb) = (a.workers(), b.workers());

	let id = a
		.controller()
		.activate_order(compute_order("site-a", "site-b"))
		.await
		.unwrap();
	sweep(&wa.open).await;
	assert_eq!(order_in(&a, &id).state, OrderState::Pending);
	assert!(a.registry().collection(CollectionKey::Remote).unwrap().contains(&id));
	let hosted = order_in(&b, &id);
	assert_eq!(hosted.state, OrderState::Open);
	assert_eq!(hosted.requesting_provider, "site-a");

	sweep(&wb.open).await;
	sweep(&wb.spawning).await;
	assert_eq!(order_in(&b, &id).state, OrderState::Fulfilled);
	// The fulfillment event reached the requester.
	assert_eq!(order_in(&a, &id).state, OrderState::Fulfilled);
	assert!(a.controller().get_instance(&id).await.is_ok());

	a.controller().delete_order(&id).await.unwrap();
	sweep(&wa.reconciliation).await;
	assert_eq!(order_in(&a, &id).state, OrderState::CheckingDeletion);
	assert_eq!(order_in(&b, &id).state, OrderState::AssignedForDeletion);

	sweep(&wb.assigned_for_deletion).await;
	sweep(&wb.checking_deletion).await;
	assert!(!b.registry().contains(&id));

	sweep(&wa.reconciliation).await;
	assert!(!a.registry().contains(&id));
	assert!(a.registry().verify_consistency().is_consistent());
	assert!(b.registry().verify_consistency().is_consistent());
}

#[tokio::test]
async fn test_reconciliation_recovers_missed_event() {
	let network = Arc::new(InProcessNetwork::new());
	let probe = Arc::new(FixedProbe::new(true));
	let a = broker(config("site-a", &["site-b"]), &network, &probe);
	let b = broker(config("site-b", &["site-a"]), &network, &probe);
	let (wa, wb) = (a.workers(), b.workers());

	let id = a
		.controller()
		.activate_order(volume_order("site-a", "site-b"))
		.await
		.unwrap();
	sweep(&wa.open).await;

	network.unregister("site-a");
	sweep(&wb.open).await;
	sweep(&wb.spawning).await;
	assert_eq!(order_in(&b, &id).state, OrderState::Fulfilled);
	assert_eq!(order_in(&a, &id).state, OrderState::Pending);

	let handler = a.federation_handler();
	network.register("site-a", &handler);
	sweep(&wa.reconciliation).await;

	let mirror = order_in(&a, &id);
	assert_eq!(mirror.state, OrderState::Fulfilled);
	assert_eq!(mirror.instance_id, order_in(&b, &id).instance_id);
}

#[tokio::test]
async fn test_untrusted_requester_fails_on_request() {
	let network = Arc::new(InProcessNetwork::new());
	let probe = Arc::new(FixedProbe::new(true));
	let a = broker(config("site-a", &["site-b"]), &network, &probe);
	// The configured allow list admits site-a but the override does not.
	let authorizer: Arc<dyn PeerAuthorizer> =
		Arc::new(AllowListAuthorizer::new(vec!["site-c".to_string()]));
	let b = BrokerBuilder::new(config("site-b", &["site-a"]))
		.with_peer_client(network.clone())
		.with_reachability_probe(probe.clone())
		.with_authorizer(authorizer)
		.build(factories())
		.unwrap();
	let handler = b.federation_handler();
	network.register("site-b", &handler);

	let id = a
		.controller()
		.activate_order(volume_order("site-a", "site-b"))
		.await
		.unwrap();
	sweep(&a.workers().open).await;

	assert_eq!(order_in(&a, &id).state, OrderState::FailedOnRequest);
	assert!(b.registry().is_empty());
}

#[tokio::test]
async fn test_one_pass_advances_one_order_per_worker() {
	let engine = standalone(Config::for_testing("site-a"), &Arc::new(FixedProbe::new(true)));
	for _ in 0..3 {
		engine
			.controller()
			.activate_order(volume_order("site-a", "site-a"))
			.await
			.unwrap();
	}

	let outcomes = engine.workers().poll_once_each().await;
	assert_eq!(outcomes.len(), 6);
	assert!(outcomes.iter().all(Result::is_ok));
	assert!(matches!(outcomes[0], Ok(PollOutcome::Processed(_))));
	assert_eq!(engine.registry().orders_list(OrderState::Open).unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelling_token_stops_run() {
	let engine = Arc::new(standalone(
		Config::for_testing("site-a"),
		&Arc::new(FixedProbe::new(true)),
	));
	let id = engine
		.controller()
		.activate_order(volume_order("site-a", "site-a"))
		.await
		.unwrap();

	let running = {
		let engine = engine.clone();
		tokio::spawn(async move { engine.run().await })
	};
	tokio::time::timeout(Duration::from_secs(10), async {
		while order_in(&engine, &id).state != OrderState::Fulfilled {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();

	engine.cancellation_token().cancel();
	let result = tokio::time::timeout(Duration::from_secs(10), running)
		.await
		.unwrap()
		.unwrap();
	assert!(result.is_ok());
}

#[tokio::test]
async fn test_restart_restores_registry_from_files() {
	let dir = tempfile::tempdir().unwrap();
	let mut config = Config::for_testing("site-a");
	let mut file = toml::map::Map::new();
	file.insert(
		"storage_path".into(),
		toml::Value::String(dir.path().to_string_lossy().into_owned()),
	);
	config.storage.primary = "file".into();
	config
		.storage
		.implementations
		.insert("file".into(), toml::Value::Table(file));
	let probe = Arc::new(FixedProbe::new(true));

	let (spawned, open) = {
		let engine = standalone(config.clone(), &probe);
		let spawned = engine
			.controller()
			.activate_order(compute_order("site-a", "site-a"))
			.await
			.unwrap();
		sweep(&engine.workers().open).await;
		let open = engine
			.controller()
			.activate_order(volume_order("site-a", "site-a"))
			.await
			.unwrap();
		(order_in(&engine, &spawned), open)
	};

	let restarted = standalone(config, &probe);
	restarted.initialize().await.unwrap();

	assert_eq!(restarted.registry().len(), 2);
	let restored = order_in(&restarted, &spawned.id);
	assert_eq!(restored.state, OrderState::Spawning);
	assert_eq!(restored.instance_id, spawned.instance_id);
	assert_eq!(order_in(&restarted, &open).state, OrderState::Open);
	assert!(restarted
		.registry()
		.orders_list(OrderState::Spawning)
		.unwrap()
		.contains(&spawned.id));
	assert!(restarted.registry().verify_consistency().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_and_deletions_interleave_consistently() {
	let engine = Arc::new(standalone(
		Config::for_testing("site-a"),
		&Arc::new(FixedProbe::new(true)),
	));
	let mut ids = Vec::new();
	for i in 0..40 {
		let order = if i % 2 == 0 {
			volume_order("site-a", "site-a")
		} else {
			compute_order("site-a", "site-a")
		};
		ids.push(engine.controller().activate_order(order).await.unwrap());
	}

	engine.spawn_workers();
	let deleters: Vec<_> = ids
		.chunks(10)
		.map(|chunk| {
			let engine = engine.clone();
			let chunk = chunk.to_vec();
			tokio::spawn(async move {
				for id in chunk {
					engine.controller().delete_order(&id).await.unwrap();
					tokio::task::yield_now().await;
				}
			})
		})
		.collect();
	for deleter in futures::future::join_all(deleters).await {
		deleter.unwrap();
	}

	tokio::time::timeout(Duration::from_secs(20), async {
		while !engine.registry().is_empty() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();

	engine.shutdown().await.unwrap();
	assert!(engine.registry().verify_consistency().is_consistent());
	assert!(engine.registry().collection_sizes().values().all(|size| *size == 0));
}
