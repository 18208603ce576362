//! Port conflict detection and resolution
//!
//! Ownership lookup shells out to `lsof` and `ps`. Missing tools or
//! unexpected output degrade to "no owners found", never to an error.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{sleep, timeout};

use shared::{component_debug, component_error, component_info, component_warn, ComponentId};

use crate::traits::PortGuard;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const LOCALHOST: &str = "127.0.0.1";
pub const DEFAULT_TERM_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// A process holding a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    pub pid: i32,
    pub user: String,
    pub command: String,
}

impl std::fmt::Display for PortOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PID {} ({}) {}", self.pid, self.user, self.command)
    }
}

pub struct PortReconciler {
    term_grace: Duration,
    kill_grace: Duration,
}

impl PortReconciler {
    pub fn new() -> Self {
        Self {
            term_grace: DEFAULT_TERM_GRACE,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Waits after SIGTERM and SIGKILL (fluent API)
    pub fn with_grace(mut self, term_grace: Duration, kill_grace: Duration) -> Self {
        self.term_grace = term_grace;
        self.kill_grace = kill_grace;
        self
    }

    /// One bounded connect attempt
    pub async fn is_port_open(&self, host: &str, port: u16) -> bool {
        matches!(
            timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    /// Processes listening on `port`, excluding the launcher itself
    pub async fn owners_of_port(&self, port: u16) -> Vec<PortOwner> {
        let own_pid = std::process::id() as i32;
        let mut owners = Vec::new();
        for pid in Self::listening_pids(port).await {
            if pid == own_pid {
                continue;
            }
            let (user, command) = Self::process_metadata(pid).await;
            owners.push(PortOwner { pid, user, command });
        }
        owners
    }

    /// Terminate every owner of `port`: SIGTERM, wait, SIGKILL survivors, wait
    ///
    /// One-shot; returns true only if the port ends up unowned.
    pub async fn free_port(&self, port: u16) -> bool {
        let owners = self.owners_of_port(port).await;
        if owners.is_empty() {
            return true;
        }

        for owner in &owners {
            component_info!(ComponentId::Supervisor, "🔓 Sending SIGTERM to {} on port {}", owner, port);
            Self::send(owner.pid, Signal::SIGTERM);
        }
        sleep(self.term_grace).await;

        let survivors = self.owners_of_port(port).await;
        if survivors.is_empty() {
            return true;
        }
        for owner in &survivors {
            component_warn!(ComponentId::Supervisor, "🔨 Sending SIGKILL to {} on port {}", owner, port);
            Self::send(owner.pid, Signal::SIGKILL);
        }
        sleep(self.kill_grace).await;

        self.owners_of_port(port).await.is_empty()
    }

    fn send(pid: i32, signal: Signal) {
        match kill(Pid::from_raw(pid), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => component_warn!(ComponentId::Supervisor, "⚠️ Failed to signal PID {}: {}", pid, e),
        }
    }

    async fn listening_pids(port: u16) -> Vec<i32> {
        let output = Command::new("lsof")
            .arg("-t")
            .arg("-n")
            .arg("-P")
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .output()
            .await;

        match output {
            // lsof exits non-zero when nothing matches
            Ok(output) if output.status.success() => parse_pids(&String::from_utf8_lossy(&output.stdout)),
            Ok(_) => Vec::new(),
            Err(e) => {
                component_debug!(ComponentId::Supervisor, "lsof unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn process_metadata(pid: i32) -> (String, String) {
        let output = Command::new("ps")
            .arg("-o")
            .arg("user=,comm=")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => parse_ps_line(&String::from_utf8_lossy(&output.stdout)),
            _ => ("?".to_string(), "?".to_string()),
        }
    }
}

impl Default for PortReconciler {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_pids(stdout: &str) -> Vec<i32> {
    let mut pids: Vec<i32> = stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn parse_ps_line(stdout: &str) -> (String, String) {
    let line = stdout.lines().next().unwrap_or_default().trim();
    match line.split_once(char::is_whitespace) {
        Some((user, command)) => (user.to_string(), command.trim().to_string()),
        None if !line.is_empty() => (line.to_string(), "?".to_string()),
        None => ("?".to_string(), "?".to_string()),
    }
}

#[async_trait]
impl PortGuard for PortReconciler {
    async fn ensure_port_available(&self, port: u16, service: &str, force: bool) -> bool {
        if !self.is_port_open(LOCALHOST, port).await {
            return true;
        }

        let owners = self.owners_of_port(port).await;
        if !force {
            component_error!(
                ComponentId::Supervisor,
                "❌ Port {} needed by {} is in use by: {}",
                port,
                service,
                if owners.is_empty() {
                    "unknown process".to_string()
                } else {
                    owners.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                }
            );
            component_error!(ComponentId::Supervisor, "Stop it manually or rerun with --force");
            return false;
        }

        if owners.is_empty() {
            component_warn!(
                ComponentId::Supervisor,
                "⚠️ Port {} is in use but no owning process was found; starting {} anyway",
                port,
                service
            );
            return true;
        }

        component_warn!(ComponentId::Supervisor, "⚠️ Port {} is in use, freeing it for {}", port, service);
        let freed = self.free_port(port).await;
        if !freed {
            component_error!(ComponentId::Supervisor, "❌ Could not free port {} for {}", port, service);
        }
        freed
    }
}
