//! Real process supervisor implementation
//!
//! Spawns every supervised unit into its own process group with combined
//! output appended to a per-unit log file, and stops units with
//! SIGTERM → wait → SIGKILL escalation against the whole group.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use shared::{component_debug, component_error, component_info, component_warn, ComponentId, ServiceSpec};

use crate::error::{LauncherError, LauncherResult};
use crate::traits::{HttpProbe, ProbePredicate, ProcessInfo, ProcessSupervisor, StopOutcome};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);
const LIVENESS_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Terminate,
    Kill,
}

impl From<SignalKind> for Signal {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        }
    }
}

/// Owned handle for one spawned process group
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    child: Child,
    pid: u32,
    pgid: i32,
    state: ProcessState,
}

impl ProcessHandle {
    /// Spawn `spec` detached into a new process group
    pub fn spawn(spec: &ServiceSpec) -> LauncherResult<Self> {
        let name = spec.name().to_string();

        if let Some(dir) = spec.log_file().parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                LauncherError::spawn(&name, format!("failed to create log directory {}: {e}", dir.display()))
            })?;
        }

        // std::fs::File does no userspace buffering; tails see output immediately
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(spec.log_file())
            .map_err(|e| {
                LauncherError::spawn(&name, format!("failed to open log file {}: {e}", spec.log_file().display()))
            })?;
        let log_err = log
            .try_clone()
            .map_err(|e| LauncherError::spawn(&name, format!("failed to duplicate log handle: {e}")))?;

        let mut cmd = Command::new(spec.program());
        cmd.args(spec.args())
            .current_dir(spec.cwd())
            .env_clear()
            .envs(spec.env().iter())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0);

        let child = cmd.spawn().map_err(|e| LauncherError::spawn(&name, e))?;
        let pid = child
            .id()
            .ok_or_else(|| LauncherError::spawn(&name, "process exited before its pid was read"))?;
        Ok(Self {
            name,
            child,
            pid,
            // process_group(0) makes the child its own group leader
            pgid: pid as i32,
            state: ProcessState::Starting,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            name: self.name.clone(),
            pid: self.pid,
            pgid: self.pgid,
        }
    }

    /// Non-blocking check; reaps the child if it has exited
    ///
    /// The first check after spawn moves `Starting` to `Running`, or to
    /// `Stopped` when the child already exited.
    pub fn is_alive(&mut self) -> bool {
        let alive = matches!(self.child.try_wait(), Ok(None));
        self.state = match (self.state, alive) {
            (ProcessState::Starting, true) => ProcessState::Running,
            (ProcessState::Starting | ProcessState::Running, false) => ProcessState::Stopped,
            (state, _) => state,
        };
        alive
    }

    /// Send `kind` to the whole process group; a vanished group is not an error
    pub fn signal(&self, kind: SignalKind) -> LauncherResult<()> {
        match killpg(Pid::from_raw(self.pgid), Signal::from(kind)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(LauncherError::Signal {
                service: self.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Poll liveness until exit or `limit`; true if the process exited
    pub async fn wait_with_timeout(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and wait briefly for reaping
    pub async fn terminate(&mut self, grace: Duration) -> LauncherResult<StopOutcome> {
        if !self.is_alive() {
            self.state = ProcessState::Stopped;
            return Ok(StopOutcome::NotRunning);
        }

        self.state = ProcessState::Stopping;
        if let Err(e) = self.signal(SignalKind::Terminate) {
            if !self.is_alive() {
                self.state = ProcessState::Stopped;
                return Ok(StopOutcome::GracefulStop);
            }
            self.state = ProcessState::Running;
            return Err(e);
        }

        if self.wait_with_timeout(grace).await {
            self.state = ProcessState::Stopped;
            return Ok(StopOutcome::GracefulStop);
        }

        component_warn!(ComponentId::Supervisor, "🔨 {}: force kill", self.name);
        if let Err(e) = self.signal(SignalKind::Kill) {
            component_error!(ComponentId::Supervisor, "❌ {}: SIGKILL failed: {}", self.name, e);
        }
        let _ = timeout(KILL_CONFIRM_TIMEOUT, self.child.wait()).await;
        self.state = ProcessState::Killed;
        Ok(StopOutcome::ForceKilled)
    }
}

/// Real process supervisor implementation
pub struct RealProcessSupervisor<H: HttpProbe> {
    /// Live handles keyed by unit name
    handles: Mutex<HashMap<String, ProcessHandle>>,

    /// Probe used for post-stop liveness verification
    probe: H,
}

impl<H: HttpProbe> RealProcessSupervisor<H> {
    pub fn new(probe: H) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            probe,
        }
    }

    /// Number of handles still owned by the supervisor
    pub async fn active_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    async fn endpoint_alive(&self, url: &str) -> bool {
        self.probe
            .status(url, LIVENESS_REQUEST_TIMEOUT)
            .await
            .is_some_and(|status| ProbePredicate::Alive.accepts(status))
    }
}

#[async_trait]
impl<H: HttpProbe> ProcessSupervisor for RealProcessSupervisor<H> {
    async fn spawn(&self, spec: &ServiceSpec) -> LauncherResult<ProcessInfo> {
        let mut handles = self.handles.lock().await;

        if let Some(existing) = handles.get_mut(spec.name()) {
            if existing.is_alive() {
                return Err(LauncherError::spawn(spec.name(), "already running"));
            }
        }

        let mut handle = ProcessHandle::spawn(spec)?;
        if !handle.is_alive() {
            component_warn!(ComponentId::Supervisor, "⚠️ {} exited immediately after spawn", spec.name());
        }
        let info = handle.info();
        component_debug!(
            ComponentId::Supervisor,
            "🚀 Spawned {} (PID: {}) logging to {}",
            spec.name(),
            info.pid,
            spec.log_file().display()
        );
        handles.insert(spec.name().to_string(), handle);
        Ok(info)
    }

    async fn stop(
        &self,
        name: &str,
        timeout: Duration,
        liveness_url: Option<String>,
    ) -> LauncherResult<StopOutcome> {
        let Some(mut handle) = self.handles.lock().await.remove(name) else {
            return Ok(StopOutcome::NotRunning);
        };

        let outcome = match handle.terminate(timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Keep the handle so a later sweep can retry
                self.handles.lock().await.insert(name.to_string(), handle);
                return Err(e);
            }
        };

        match outcome {
            StopOutcome::NotRunning => {
                component_info!(ComponentId::Supervisor, "{} is not running", name);
            }
            StopOutcome::GracefulStop => match liveness_url.as_deref() {
                Some(url) if self.endpoint_alive(url).await => {
                    component_warn!(
                        ComponentId::Supervisor,
                        "⚠️ {}: exited but {} still answers",
                        name,
                        url
                    );
                }
                _ => component_info!(ComponentId::Supervisor, "🛑 {} stopped successfully", name),
            },
            StopOutcome::ForceKilled => {
                if let Some(url) = liveness_url.as_deref() {
                    if self.endpoint_alive(url).await {
                        component_error!(
                            ComponentId::Supervisor,
                            "❌ {} force kill failed, stop {} manually",
                            name,
                            name
                        );
                    } else {
                        component_info!(ComponentId::Supervisor, "🔨 {} force killed successfully", name);
                    }
                }
                if handle.is_alive() {
                    component_error!(
                        ComponentId::Supervisor,
                        "❌ {} (PID: {}) survived SIGKILL",
                        name,
                        handle.pid()
                    );
                }
            }
        }

        Ok(outcome)
    }

    async fn is_alive(&self, name: &str) -> bool {
        match self.handles.lock().await.get_mut(name) {
            Some(handle) => handle.is_alive(),
            None => false,
        }
    }
}
