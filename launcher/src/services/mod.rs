//! Service implementations
//!
//! This module contains real implementations of all collaborator traits.
//! These are the production implementations that handle actual I/O operations.

pub mod dns_sd;
pub mod http_probe;
pub mod migrations;
pub mod mqtt_bus;
pub mod port_reconciler;
pub mod process_supervisor;
pub mod readiness;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use dns_sd::DnsSdRegistrar;
pub use http_probe::ReqwestProbe;
pub use migrations::CommandMigrator;
pub use mqtt_bus::MqttBus;
pub use port_reconciler::{PortOwner, PortReconciler};
pub use process_supervisor::{ProcessHandle, ProcessState, RealProcessSupervisor, SignalKind};
pub use readiness::ReadinessGate;
