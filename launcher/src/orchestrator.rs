//! Startup/shutdown orchestrator
//!
//! Walks the static stage graph strictly sequentially: every stage is
//! port-checked, spawned and gated on readiness before the next one is
//! attempted. A failure anywhere unwinds what this call started.

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::sleep;

use shared::{component_error, component_info, component_warn, ComponentId, StageName};

use crate::core::graph::{Readiness, Stage, StageGraph};
use crate::error::{LauncherError, LauncherResult};
use crate::services::process_supervisor::DEFAULT_STOP_TIMEOUT;
use crate::traits::{PortGuard, ProcessSupervisor, ReadinessCheck, StopOutcome};

/// What a shutdown sweep did, unit by unit
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StopSummary {
    pub stopped: Vec<String>,
    pub force_killed: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl StopSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: StopSummary) {
        self.stopped.extend(other.stopped);
        self.force_killed.extend(other.force_killed);
        self.failures.extend(other.failures);
    }
}

/// Sequences stage start and stop over a [`StageGraph`]
pub struct StartupOrchestrator<S, R, P>
where
    S: ProcessSupervisor,
    R: ReadinessCheck,
    P: PortGuard,
{
    graph: StageGraph,
    supervisor: S,
    readiness: R,
    ports: P,
    stop_timeout: Duration,

    /// Stages started successfully, in start order
    running: Vec<StageName>,
}

impl<S, R, P> StartupOrchestrator<S, R, P>
where
    S: ProcessSupervisor,
    R: ReadinessCheck,
    P: PortGuard,
{
    pub fn new(graph: StageGraph, supervisor: S, readiness: R, ports: P) -> Self {
        Self {
            graph,
            supervisor,
            readiness,
            ports,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            running: Vec::new(),
        }
    }

    /// Grace window between SIGTERM and SIGKILL (fluent API)
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn running(&self) -> &[StageName] {
        &self.running
    }

    /// Start `requested` in dependency order, returning the stages started
    ///
    /// Stages outside the request are skipped entirely. On failure every
    /// stage started by this call, including a partially started one, is
    /// stopped in reverse start order before the error is returned.
    pub async fn start(&mut self, requested: &BTreeSet<StageName>, force: bool) -> LauncherResult<Vec<StageName>> {
        let plan: Vec<StageName> = self
            .graph
            .start_plan(requested)?
            .into_iter()
            .map(|stage| stage.name().clone())
            .collect();

        component_info!(
            ComponentId::Launcher,
            "🚀 Starting stages: {}",
            plan.iter().map(StageName::as_str).collect::<Vec<_>>().join(", ")
        );

        let mut started = Vec::with_capacity(plan.len());
        for name in &plan {
            let Some(stage) = self.graph.get(name) else {
                continue;
            };
            if let Err(e) = self.launch(stage, force, &mut started).await {
                component_error!(ComponentId::Launcher, "❌ Stage {} failed: {}", name, e);
                self.unwind(&started).await;
                return Err(e);
            }
        }

        self.running.extend(started.iter().cloned());
        component_info!(ComponentId::Launcher, "✅ All requested stages are up");
        Ok(started)
    }

    /// Stop every stage in reverse dependency order
    ///
    /// Stages that were never started are no-ops. Every stop is attempted
    /// even when an earlier one fails.
    pub async fn stop_all(&mut self) -> StopSummary {
        component_info!(ComponentId::Launcher, "🛑 Stopping all stages");
        let mut summary = StopSummary::default();
        for stage in self.graph.stop_order() {
            summary.merge(self.stop_stage(stage).await);
        }
        self.running.clear();

        for (unit, reason) in &summary.failures {
            component_error!(ComponentId::Launcher, "❌ Failed to stop {}: {}", unit, reason);
        }
        summary
    }

    async fn launch(&self, stage: &Stage, force: bool, started: &mut Vec<StageName>) -> LauncherResult<()> {
        let name = stage.name();
        component_info!(ComponentId::Launcher, "▶️  Starting {}", name);

        if let Some(port) = stage.port() {
            if !self.ports.ensure_port_available(port, name.as_str(), force).await {
                return Err(LauncherError::PortConflict {
                    port,
                    service: name.to_string(),
                });
            }
        }

        for unit in stage.units() {
            self.supervisor.spawn(unit).await?;
            if started.last() != Some(name) {
                started.push(name.clone());
            }
        }

        match stage.readiness() {
            Readiness::Http(url) => self.readiness.await_ready(url).await?,
            Readiness::Settle(delay) => sleep(*delay).await,
            Readiness::Immediate => {}
        }
        if !stage.settle_after().is_zero() {
            sleep(stage.settle_after()).await;
        }

        component_info!(ComponentId::Launcher, "✅ {} is up", name);
        Ok(())
    }

    async fn unwind(&self, started: &[StageName]) {
        if started.is_empty() {
            return;
        }
        component_warn!(ComponentId::Launcher, "↩️  Unwinding {} started stage(s)", started.len());
        for name in started.iter().rev() {
            if let Some(stage) = self.graph.get(name) {
                let summary = self.stop_stage(stage).await;
                for (unit, reason) in summary.failures {
                    component_error!(ComponentId::Launcher, "❌ Failed to stop {} during unwind: {}", unit, reason);
                }
            }
        }
    }

    async fn stop_stage(&self, stage: &Stage) -> StopSummary {
        let mut summary = StopSummary::default();
        let liveness_url = stage.liveness_url().map(str::to_string);

        for unit in stage.units().iter().rev() {
            match self
                .supervisor
                .stop(unit.name(), self.stop_timeout, liveness_url.clone())
                .await
            {
                Ok(StopOutcome::NotRunning) => {}
                Ok(StopOutcome::GracefulStop) => summary.stopped.push(unit.name().to_string()),
                Ok(StopOutcome::ForceKilled) => {
                    component_warn!(
                        ComponentId::Launcher,
                        "⚠️ {} ignored SIGTERM for {:?} and was force killed",
                        unit.name(),
                        self.stop_timeout
                    );
                    summary.force_killed.push(unit.name().to_string());
                }
                Err(e) => summary.failures.push((unit.name().to_string(), e.to_string())),
            }
        }
        summary
    }
}
