//! Test helpers and builder patterns for launcher tests

use launcher::services::{PortReconciler, ReadinessGate, RealProcessSupervisor, ReqwestProbe};
use launcher::{StageGraph, StartupOrchestrator};
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::fixtures::TestFixtures;

pub type RealOrchestrator =
    StartupOrchestrator<RealProcessSupervisor<ReqwestProbe>, ReadinessGate<ReqwestProbe>, PortReconciler>;

/// Builder for orchestrators wired to the real services with short timeouts
pub struct OrchestratorBuilder {
    ready_timeout: Duration,
    stop_timeout: Duration,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            ready_timeout: TestFixtures::READY_TIMEOUT,
            stop_timeout: TestFixtures::STOP_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn build(self, graph: StageGraph) -> RealOrchestrator {
        let readiness = ReadinessGate::new(ReqwestProbe::new())
            .with_timeout(self.ready_timeout)
            .with_poll_interval(Duration::from_millis(50))
            .with_request_timeout(Duration::from_millis(200));
        StartupOrchestrator::new(
            graph,
            RealProcessSupervisor::new(ReqwestProbe::new()),
            readiness,
            PortReconciler::new().with_grace(Duration::from_millis(200), Duration::from_millis(100)),
        )
        .with_stop_timeout(self.stop_timeout)
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestHelpers;

impl TestHelpers {
    /// Poll `path` until it contains `needle` or `limit` passes
    pub async fn wait_for_log(path: &Path, needle: &str, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if std::fs::read_to_string(path).is_ok_and(|log| log.contains(needle)) {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// A local port with nothing listening on it
    pub fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        listener.local_addr().expect("local addr").port()
    }
}
