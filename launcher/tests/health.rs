//! Integration tests: health aggregation against real HTTP endpoints
//!
//! The three polled services are wiremock servers; the bus and the
//! registrar are mocks.

mod common;

use mockall::predicate::always;
use std::sync::{Arc, Mutex};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::TestFixtures;
use launcher::core::DiscoveryDescriptor;
use launcher::services::ReqwestProbe;
use launcher::traits::{MockDiscoveryRegistrar, MockMessageBus};
use launcher::{stages, BusMessage, HealthAggregator, LauncherConfig};

async fn server_with_status(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn recording_registrar() -> (MockDiscoveryRegistrar, Arc<Mutex<Vec<DiscoveryDescriptor>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registrar = MockDiscoveryRegistrar::new();
    let sink = Arc::clone(&seen);
    registrar.expect_register().with(always()).returning(move |descriptor| {
        sink.lock().unwrap().push(descriptor.clone());
        Ok(())
    });
    registrar.expect_unregister().returning(|| Ok(()));
    (registrar, seen)
}

fn quiet_bus() -> MockMessageBus {
    let mut bus = MockMessageBus::new();
    bus.expect_disconnect().returning(|| Ok(()));
    bus
}

#[tokio::test]
async fn test_broadcast_follows_service_health() {
    let dir = tempfile::tempdir().unwrap();
    let auth = server_with_status(200).await;
    let store = server_with_status(200).await;
    let compute = server_with_status(200).await;
    let config = LauncherConfig::from_toml(&TestFixtures::config_toml(
        dir.path(),
        auth.address().port(),
        store.address().port(),
        compute.address().port(),
    ))
    .unwrap();

    let (registrar, seen) = recording_registrar();
    let aggregator = HealthAggregator::new(
        stages::health_records(&config),
        stages::heartbeat_router(&config),
        stages::descriptor_template(&config),
        ReqwestProbe::new(),
        quiet_bus(),
        registrar,
    );

    // worker w1 has not reported yet
    assert!(aggregator.tick().await);
    {
        let seen = seen.lock().unwrap();
        assert!(!seen[0].healthy);
        assert_eq!(seen[0].failing, vec!["worker:w1"]);
        assert!(seen[0].txt.contains(&"error=worker:w1".to_string()));
    }

    let heartbeat = BusMessage::new(
        "inference/workers/w1",
        br#"{"worker_id":"w1","capabilities":["image_resize"]}"#.to_vec(),
    );
    assert!(aggregator.ingest(&heartbeat).await);
    assert!(aggregator.tick().await);
    {
        let seen = seen.lock().unwrap();
        assert!(seen[1].healthy);
        assert!(!seen[1].txt.iter().any(|entry| entry.starts_with("status=")));
        assert_eq!(seen[1].txt[0], "desc=CL Image Repo Service");
    }

    // compute starts failing
    compute.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&compute)
        .await;
    assert!(aggregator.tick().await);
    assert!(!aggregator.tick().await);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[2].failing, vec!["compute"]);
    assert!(seen[2].txt.contains(&"status=unhealthy".to_string()));
    assert!(seen[2].txt.contains(&"error=compute".to_string()));
    assert_eq!(seen[2].port, store.address().port());
}

/// A stopped endpoint counts as unhealthy
#[tokio::test]
async fn test_unreachable_service_is_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let auth = server_with_status(200).await;
    let store = server_with_status(200).await;
    let config = LauncherConfig::from_toml(&TestFixtures::config_toml(
        dir.path(),
        auth.address().port(),
        store.address().port(),
        common::TestHelpers::unused_port(),
    ))
    .unwrap();

    let (registrar, seen) = recording_registrar();
    let aggregator = HealthAggregator::new(
        stages::health_records(&config),
        stages::heartbeat_router(&config),
        stages::descriptor_template(&config),
        ReqwestProbe::new(),
        quiet_bus(),
        registrar,
    );

    aggregator.tick().await;
    let records = aggregator.records().await;
    assert!(records.get("auth").unwrap().healthy);
    assert!(!records.get("compute").unwrap().healthy);
    assert_eq!(seen.lock().unwrap()[0].failing, vec!["compute", "worker:w1"]);

    aggregator.stop().await;
}
