//! Integration tests: the orchestrator driving real processes
//!
//! Services are `sleep` processes; readiness endpoints are wiremock servers.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiremock::matchers::method;

use common::{OrchestratorBuilder, TestFixtures};
use launcher::{LauncherError, ProcessSupervisor, StageGraph};
use shared::StageName;

async fn ready_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn all(graph: &StageGraph) -> BTreeSet<StageName> {
    graph.names()
}

#[tokio::test]
async fn test_full_start_and_stop_with_real_processes() {
    let dir = tempfile::tempdir().unwrap();
    let server = ready_server(200).await;
    let graph = StageGraph::new(vec![
        TestFixtures::http_stage("auth", &server.uri(), dir.path(), &[]),
        TestFixtures::settle_stage("compute", dir.path(), &["auth"]),
        TestFixtures::worker_pool("workers", 2, dir.path(), &["auth", "compute"]),
    ])
    .unwrap();
    let requested = all(&graph);
    let mut orchestrator = OrchestratorBuilder::new().build(graph);

    let started = assert_ok!(orchestrator.start(&requested, false).await);
    assert_eq!(started.len(), 3);
    for unit in ["auth", "compute", "worker-0", "worker-1"] {
        assert!(orchestrator.supervisor().is_alive(unit).await, "{unit} should be running");
        assert!(dir.path().join("logs").join(format!("{unit}.log")).exists());
    }

    let summary = orchestrator.stop_all().await;
    assert!(summary.is_clean());
    assert_eq!(summary.stopped, vec!["worker-1", "worker-0", "compute", "auth"]);
    for unit in ["auth", "compute", "worker-0", "worker-1"] {
        assert!(!orchestrator.supervisor().is_alive(unit).await);
    }
}

/// A readiness timeout stops everything this call started
#[tokio::test]
async fn test_readiness_timeout_unwinds_started_processes() {
    let dir = tempfile::tempdir().unwrap();
    let healthy = ready_server(200).await;
    let unhealthy = ready_server(503).await;
    let graph = StageGraph::new(vec![
        TestFixtures::http_stage("auth", &healthy.uri(), dir.path(), &[]),
        TestFixtures::http_stage("store", &unhealthy.uri(), dir.path(), &["auth"]),
        TestFixtures::worker_pool("workers", 1, dir.path(), &["store"]),
    ])
    .unwrap();
    let requested = all(&graph);
    let mut orchestrator = OrchestratorBuilder::new()
        .with_ready_timeout(TestFixtures::SHORT_READY_TIMEOUT)
        .build(graph);

    let result = orchestrator.start(&requested, false).await;

    assert!(matches!(result, Err(LauncherError::ReadinessTimeout { .. })));
    assert!(!orchestrator.supervisor().is_alive("auth").await);
    assert!(!orchestrator.supervisor().is_alive("store").await);
    assert!(!dir.path().join("logs").join("worker-0.log").exists());
    assert!(orchestrator.running().is_empty());
    assert_eq!(orchestrator.supervisor().active_count().await, 0);
}

/// An occupied port aborts before the stage's process is spawned
#[tokio::test]
async fn test_port_conflict_prevents_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = ready_server(200).await;
    let graph = StageGraph::new(vec![
        TestFixtures::http_stage("auth", &server.uri(), dir.path(), &[]),
        TestFixtures::http_stage("store", &server.uri(), dir.path(), &["auth"]).with_port(port),
    ])
    .unwrap();
    let requested = all(&graph);
    let mut orchestrator = OrchestratorBuilder::new().build(graph);

    let result = orchestrator.start(&requested, false).await;

    match result {
        Err(LauncherError::PortConflict { port: conflict, service }) => {
            assert_eq!(conflict, port);
            assert_eq!(service, "store");
        }
        other => panic!("expected port conflict, got {other:?}"),
    }
    assert!(!dir.path().join("logs").join("store.log").exists());
    assert!(!orchestrator.supervisor().is_alive("auth").await);
}

#[tokio::test]
async fn test_requested_subset_skips_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let server = ready_server(200).await;
    let graph = StageGraph::new(vec![
        TestFixtures::http_stage("a", &server.uri(), dir.path(), &[]),
        TestFixtures::http_stage("b", &server.uri(), dir.path(), &["a"]),
        TestFixtures::http_stage("c", &server.uri(), dir.path(), &["a", "b"]),
    ])
    .unwrap();
    let requested: BTreeSet<StageName> = [TestFixtures::name("a"), TestFixtures::name("c")].into_iter().collect();
    let mut orchestrator = OrchestratorBuilder::new().build(graph);

    let started = orchestrator.start(&requested, false).await.unwrap();

    assert_eq!(started, vec![TestFixtures::name("a"), TestFixtures::name("c")]);
    assert!(!dir.path().join("logs").join("b.log").exists());

    let summary = orchestrator.stop_all().await;
    assert_eq!(summary.stopped, vec!["c", "a"]);
}

/// A unit ignoring SIGTERM is force killed and the sweep continues
#[tokio::test]
async fn test_stop_all_force_kills_stubborn_unit() {
    let dir = tempfile::tempdir().unwrap();
    let stubborn = TestFixtures::shell_spec("stubborn", "trap '' TERM; sleep 30", dir.path(), &[]);
    let graph = StageGraph::new(vec![
        launcher::Stage::service(TestFixtures::name("stubborn"), stubborn)
            .with_readiness(launcher::Readiness::Settle(Duration::from_millis(200))),
        TestFixtures::settle_stage("polite", dir.path(), &["stubborn"]),
    ])
    .unwrap();
    let requested = all(&graph);
    let mut orchestrator = OrchestratorBuilder::new()
        .with_stop_timeout(Duration::from_millis(300))
        .build(graph);

    orchestrator.start(&requested, false).await.unwrap();
    let summary = orchestrator.stop_all().await;

    assert_eq!(summary.stopped, vec!["polite"]);
    assert_eq!(summary.force_killed, vec!["stubborn"]);
    assert!(summary.is_clean());
    assert!(!orchestrator.supervisor().is_alive("stubborn").await);
}

/// Stages that exit on their own are no-ops at shutdown
#[tokio::test]
async fn test_stop_all_after_units_exited() {
    let dir = tempfile::tempdir().unwrap();
    let spec = TestFixtures::shell_spec("oneshot", "echo done", dir.path(), &[]);
    let graph = StageGraph::new(vec![launcher::Stage::service(TestFixtures::name("oneshot"), spec)
        .with_readiness(launcher::Readiness::Immediate)])
    .unwrap();
    let requested = all(&graph);
    let mut orchestrator = OrchestratorBuilder::new().build(graph);

    orchestrator.start(&requested, false).await.unwrap();
    assert!(
        common::TestHelpers::wait_for_log(
            &dir.path().join("logs").join("oneshot.log"),
            "done",
            Duration::from_secs(5)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let summary = orchestrator.stop_all().await;
    assert!(summary.stopped.is_empty());
    assert!(summary.is_clean());
}
