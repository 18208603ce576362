//! Dependency-ordered launcher for the CL server deployment
//!
//! Starts auth, compute, store, the compute workers and the insight worker
//! in dependency order, unwinds on failure, advertises the aggregated
//! health of the deployment through service discovery and stops
//! everything in reverse order on a termination signal.

pub mod broadcaster;
pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod signals;
pub mod stages;
pub mod traits;

// Re-export commonly used types
pub use broadcaster::{AggregatorSettings, HealthAggregator};
pub use config::LauncherConfig;
pub use core::{Readiness, Stage, StageGraph, StageKind};
pub use error::{LauncherError, LauncherResult};
pub use orchestrator::{StartupOrchestrator, StopSummary};
pub use traits::{
    BusMessage, DiscoveryRegistrar, HttpProbe, MessageBus, Migrator, PortGuard, ProbePredicate, ProcessInfo,
    ProcessSupervisor, ReadinessCheck, StopOutcome,
};
