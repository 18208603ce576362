//! Launcher configuration
//!
//! Loaded once from a TOML file at startup and never mutated afterwards.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LauncherError, LauncherResult};
use crate::services::migrations::{default_migration_command, DEFAULT_MIGRATION_TIMEOUT};

#[derive(Debug, Clone, Deserialize)]
pub struct LauncherConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub auth_dir: PathBuf,
    pub store_dir: PathBuf,
    pub compute_dir: PathBuf,
    /// The insight worker stage exists only when this is set
    #[serde(default)]
    pub insight_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_auth_port")]
    pub auth: u16,
    #[serde(default = "default_store_port")]
    pub store: u16,
    #[serde(default = "default_compute_port")]
    pub compute: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            auth: default_auth_port(),
            store: default_store_port(),
            compute: default_compute_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    pub dir: PathBuf,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_capability_prefix")]
    pub capability_topic_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            capability_topic_prefix: default_capability_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Advertised port; the store port when unset
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Track the insight worker's heartbeat
    #[serde(default = "default_true")]
    pub monitor_insight: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_type: default_service_type(),
            port: None,
            description: default_description(),
            enabled: true,
            monitor_insight: true,
        }
    }
}

/// Timing overrides, in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_heartbeat_staleness")]
    pub heartbeat_staleness_secs: u64,
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_secs: default_readiness_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            health_interval_secs: default_health_interval(),
            heartbeat_staleness_secs: default_heartbeat_staleness(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

impl TimingConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn heartbeat_staleness(&self) -> Duration {
        Duration::from_secs(self.heartbeat_staleness_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_migration_command")]
    pub command: Vec<String>,
    #[serde(default = "default_migration_timeout")]
    pub timeout_secs: u64,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_migration_command(),
            timeout_secs: default_migration_timeout(),
        }
    }
}

impl MigrationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_auth_port() -> u16 {
    8010
}

fn default_store_port() -> u16 {
    8011
}

fn default_compute_port() -> u16 {
    8012
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_capability_prefix() -> String {
    "inference/workers".to_string()
}

fn default_service_name() -> String {
    "server100@cloudonlapapps".to_string()
}

fn default_service_type() -> String {
    "_http._tcp".to_string()
}

fn default_description() -> String {
    "CL Image Repo Service".to_string()
}

fn default_true() -> bool {
    true
}

fn default_readiness_timeout() -> u64 {
    30
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    5
}

fn default_heartbeat_staleness() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    1
}

fn default_migration_timeout() -> u64 {
    DEFAULT_MIGRATION_TIMEOUT.as_secs()
}

impl LauncherConfig {
    /// Read, parse and validate the file at `path`
    pub fn load(path: impl AsRef<Path>) -> LauncherResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LauncherError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> LauncherResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LauncherResult<()> {
        let ports = [
            ("ports.auth", self.ports.auth),
            ("ports.store", self.ports.store),
            ("ports.compute", self.ports.compute),
        ];
        if let Some((field, _)) = ports.iter().find(|(_, port)| *port == 0) {
            return Err(LauncherError::config(format!("{field} must be non-zero")));
        }
        let distinct: HashSet<u16> = ports.iter().map(|(_, port)| *port).collect();
        if distinct.len() != ports.len() {
            return Err(LauncherError::config("ports.auth, ports.store and ports.compute must differ"));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.id.trim().is_empty() {
                return Err(LauncherError::config("workers.id must not be empty"));
            }
            if !seen.insert(worker.id.as_str()) {
                return Err(LauncherError::config(format!("duplicate worker id '{}'", worker.id)));
            }
        }

        if self.migrations.command.is_empty() {
            return Err(LauncherError::config("migrations.command must not be empty"));
        }
        if self.timing.health_interval_secs == 0 {
            return Err(LauncherError::config("timing.health_interval_secs must be non-zero"));
        }
        Ok(())
    }

    pub fn auth_url(&self) -> String {
        local_url(self.ports.auth)
    }

    pub fn store_url(&self) -> String {
        local_url(self.ports.store)
    }

    pub fn compute_url(&self) -> String {
        local_url(self.ports.compute)
    }

    /// Port advertised through service discovery
    pub fn advertised_port(&self) -> u16 {
        self.discovery.port.unwrap_or(self.ports.store)
    }
}

fn local_url(port: u16) -> String {
    format!("http://localhost:{port}")
}
