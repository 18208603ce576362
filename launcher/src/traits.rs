//! Trait definitions with mockall annotations for testing
//!
//! Every collaborator the orchestrator and the health broadcaster talk to
//! sits behind one of these traits. Real implementations live in
//! `services`; tests substitute the generated mocks or hand-written fakes.

use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use shared::ServiceSpec;

use crate::core::health::DiscoveryDescriptor;
use crate::error::LauncherResult;

/// Identity of a spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: u32,
    pub pgid: i32,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing to do: never started or already exited
    NotRunning,
    /// Exited within the grace window after SIGTERM
    GracefulStop,
    /// Required SIGKILL after the grace window elapsed
    ForceKilled,
}

/// One message delivered by the message bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// HTTP status predicates
///
/// Startup readiness, shutdown liveness and background polling each use
/// their own threshold. They are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePredicate {
    /// Any 2xx response
    Ready,
    /// Any response below 500; 4xx means alive but refusing
    Alive,
    /// Exactly 200
    PolledLiveness,
}

impl ProbePredicate {
    pub fn accepts(self, status: u16) -> bool {
        match self {
            ProbePredicate::Ready => (200..300).contains(&status),
            ProbePredicate::Alive => status < 500,
            ProbePredicate::PolledLiveness => status == 200,
        }
    }
}

/// OS process lifecycle for supervised units
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Spawn the unit described by `spec` into its own process group
    async fn spawn(&self, spec: &ServiceSpec) -> LauncherResult<ProcessInfo>;

    /// Stop a unit by name with SIGTERM → wait → SIGKILL escalation
    ///
    /// `liveness_url`, when given, is probed after the process exits to
    /// detect an endpoint that is still answering.
    async fn stop(
        &self,
        name: &str,
        timeout: Duration,
        liveness_url: Option<String>,
    ) -> LauncherResult<StopOutcome>;

    /// Whether the unit's process is currently running
    async fn is_alive(&self, name: &str) -> bool;
}

/// Startup readiness gate
#[mockall::automock]
#[async_trait::async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Resolve once `url` answers with a 2xx, or fail with `ReadinessTimeout`
    async fn await_ready(&self, url: &str) -> LauncherResult<()>;
}

/// Pre-spawn port conflict detection and resolution
#[mockall::automock]
#[async_trait::async_trait]
pub trait PortGuard: Send + Sync {
    /// Returns false when the port stays occupied
    async fn ensure_port_available(&self, port: u16, service: &str, force: bool) -> bool;
}

/// Single HTTP GET returning the response status, if any
#[mockall::automock]
#[async_trait::async_trait]
pub trait HttpProbe: Send + Sync {
    async fn status(&self, url: &str, timeout: Duration) -> Option<u16>;
}

/// Publish/subscribe channel carrying heartbeats
#[mockall::automock]
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to `topics`; inbound messages arrive on the returned channel
    async fn subscribe(&self, topics: Vec<String>) -> LauncherResult<mpsc::Receiver<BusMessage>>;

    /// Best-effort disconnect
    async fn disconnect(&self) -> LauncherResult<()>;
}

/// External service-discovery registrar
#[mockall::automock]
#[async_trait::async_trait]
pub trait DiscoveryRegistrar: Send + Sync {
    /// Advertise `descriptor`, replacing any previous registration
    async fn register(&self, descriptor: &DiscoveryDescriptor) -> LauncherResult<()>;

    /// Withdraw the active registration, if any
    async fn unregister(&self) -> LauncherResult<()>;
}

/// Database schema migration collaborator
#[mockall::automock]
#[async_trait::async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, service: &str, service_dir: &Path) -> LauncherResult<()>;
}
