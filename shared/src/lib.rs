//! Shared types for the service launcher
//!
//! Contains the stage and service descriptions consumed by the launcher,
//! the environment composition used for every spawned process, and the
//! logging conventions shared by all launcher components.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
