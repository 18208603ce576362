//! Launcher-specific error types

use std::time::Duration;
use thiserror::Error;

use shared::SharedError;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Failed to spawn {service}: {reason}")]
    Spawn { service: String, reason: String },

    #[error("Server did not become ready: {url} (waited {timeout:?})")]
    ReadinessTimeout { url: String, timeout: Duration },

    #[error("Port {port} required by {service} is already in use")]
    PortConflict { port: u16, service: String },

    #[error("{service} service migration failed: {reason}")]
    Migration { service: String, reason: String },

    #[error("Discovery registrar failed: {message}")]
    BroadcastRegistrar { message: String },

    #[error("Failed to signal {service}: {reason}")]
    Signal { service: String, reason: String },

    #[error("Configuration error: {field}")]
    Configuration { field: String },

    #[error("Invalid dependency graph: {reason}")]
    DependencyGraph { reason: String },

    #[error("Message bus error: {message}")]
    Bus { message: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LauncherError {
    pub fn spawn(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::Spawn {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(field: impl Into<String>) -> Self {
        Self::Configuration { field: field.into() }
    }

    pub fn graph(reason: impl Into<String>) -> Self {
        Self::DependencyGraph { reason: reason.into() }
    }

    pub fn migration(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::Migration {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn registrar(message: impl ToString) -> Self {
        Self::BroadcastRegistrar {
            message: message.to_string(),
        }
    }

    pub fn bus(message: impl ToString) -> Self {
        Self::Bus {
            message: message.to_string(),
        }
    }
}

pub type LauncherResult<T> = Result<T, LauncherError>;
