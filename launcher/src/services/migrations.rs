//! Database migration runner
//!
//! Runs the configured migration command (alembic by default) in each
//! service directory before any stage starts.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use shared::{component_debug, component_info, logging, ComponentId, Environment};

use crate::error::{LauncherError, LauncherResult};
use crate::traits::Migrator;

pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(30);
const ALEMBIC_CONFIG: &str = "alembic.ini";

pub fn default_migration_command() -> Vec<String> {
    ["uv", "run", "alembic", "upgrade", "head"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub struct CommandMigrator {
    command: Vec<String>,
    env: Environment,
    timeout: Duration,
}

impl CommandMigrator {
    pub fn new(command: Vec<String>, env: Environment) -> LauncherResult<Self> {
        if command.is_empty() {
            return Err(LauncherError::config("migrations.command must not be empty"));
        }
        Ok(Self {
            command,
            env,
            timeout: DEFAULT_MIGRATION_TIMEOUT,
        })
    }

    /// Per-service timeout (fluent API)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

}

#[async_trait]
impl Migrator for CommandMigrator {
    async fn migrate(&self, service: &str, service_dir: &Path) -> LauncherResult<()> {
        if !service_dir.is_dir() {
            return Err(LauncherError::migration(
                service,
                format!("service directory does not exist: {}", service_dir.display()),
            ));
        }
        if !service_dir.join(ALEMBIC_CONFIG).is_file() {
            return Err(LauncherError::migration(
                service,
                format!("no {} found in {}", ALEMBIC_CONFIG, service_dir.display()),
            ));
        }

        component_info!(ComponentId::Launcher, "🗄️  Running migrations for {} at {}", service, service_dir.display());

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(service_dir)
            .env_clear()
            .envs(self.env.iter())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(LauncherError::migration(service, e)),
            Err(_) => {
                return Err(LauncherError::migration(
                    service,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        if !output.status.success() {
            component_debug!(ComponentId::Launcher, "STDOUT: {}", String::from_utf8_lossy(&output.stdout));
            component_debug!(ComponentId::Launcher, "STDERR: {}", String::from_utf8_lossy(&output.stderr));
            return Err(LauncherError::migration(service, format!("exited with {}", output.status)));
        }

        component_info!(ComponentId::Launcher, "✅ Migration completed for {}", service);
        Ok(())
    }
}

/// Migrate `services` in order, stopping at the first failure
pub async fn run_migrations<M: Migrator + ?Sized>(
    migrator: &M,
    services: &[(String, std::path::PathBuf)],
) -> LauncherResult<()> {
    for (i, (service, dir)) in services.iter().enumerate() {
        logging::log_progress(
            ComponentId::Launcher,
            "Database migrations",
            &format!("{}/{} {}", i + 1, services.len(), service),
        );
        migrator.migrate(service, dir).await?;
    }
    Ok(())
}
