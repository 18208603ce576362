//! Core launcher logic
//!
//! Pure state and ordering rules with no I/O: the stage dependency graph
//! and the health bookkeeping behind the discovery broadcast.

pub mod graph;
pub mod health;

pub use graph::{Readiness, Stage, StageGraph, StageKind, DEFAULT_SETTLE_DELAY};
pub use health::{
    BroadcastState, DescriptorTemplate, DiscoveryDescriptor, HealthRecord, HealthRecords, HeartbeatRejection,
    HeartbeatRouter,
};
