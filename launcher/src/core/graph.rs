//! Static stage dependency graph
//!
//! Stages are declared once at startup and never change. The graph fixes a
//! single topological order (declaration order is the tie-breaker) that is
//! used for both start (forward) and stop (reverse).

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use shared::{ServiceSpec, StageName};

use crate::error::{LauncherError, LauncherResult};

/// Settle delay for stages that expose no readiness endpoint
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How a stage proves it is ready before the next one is attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Poll the URL until it answers 2xx
    Http(String),
    /// Wait a fixed delay
    Settle(Duration),
    /// Continue immediately (queue/socket listeners)
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    Service(ServiceSpec),
    WorkerPool(Vec<ServiceSpec>),
}

/// One named step of the startup sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    name: StageName,
    kind: StageKind,
    depends_on: BTreeSet<StageName>,
    port: Option<u16>,
    readiness: Readiness,
    settle_after: Duration,
    liveness_url: Option<String>,
}

impl Stage {
    /// A single service; dependencies and readiness come from `spec`
    pub fn service(name: StageName, spec: ServiceSpec) -> Self {
        let readiness = match spec.readiness_url() {
            Some(url) => Readiness::Http(url.to_string()),
            None => Readiness::Settle(DEFAULT_SETTLE_DELAY),
        };
        Self {
            name,
            depends_on: spec.dependencies().clone(),
            liveness_url: spec.readiness_url().map(str::to_string),
            kind: StageKind::Service(spec),
            port: None,
            readiness,
            settle_after: Duration::ZERO,
        }
    }

    /// A group of workers started together, without individual readiness waits
    pub fn worker_pool<I>(name: StageName, depends_on: I, workers: Vec<ServiceSpec>) -> Self
    where
        I: IntoIterator<Item = StageName>,
    {
        Self {
            name,
            kind: StageKind::WorkerPool(workers),
            depends_on: depends_on.into_iter().collect(),
            port: None,
            readiness: Readiness::Immediate,
            settle_after: Duration::ZERO,
            liveness_url: None,
        }
    }

    /// Fixed port checked for conflicts before spawning
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Extra delay after readiness, for dependents that need cached state
    pub fn with_settle_after(mut self, delay: Duration) -> Self {
        self.settle_after = delay;
        self
    }

    pub fn name(&self) -> &StageName {
        &self.name
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn depends_on(&self) -> &BTreeSet<StageName> {
        &self.depends_on
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn settle_after(&self) -> Duration {
        self.settle_after
    }

    pub fn liveness_url(&self) -> Option<&str> {
        self.liveness_url.as_deref()
    }

    /// Processes making up this stage, in spawn order
    pub fn units(&self) -> &[ServiceSpec] {
        match &self.kind {
            StageKind::Service(spec) => std::slice::from_ref(spec),
            StageKind::WorkerPool(workers) => workers,
        }
    }
}

/// Acyclic graph of stages with a fixed topological order
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
    index: HashMap<StageName, usize>,
    order: Vec<usize>,
}

impl StageGraph {
    pub fn new(stages: Vec<Stage>) -> LauncherResult<Self> {
        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.name.clone(), i).is_some() {
                return Err(LauncherError::graph(format!("duplicate stage '{}'", stage.name)));
            }
        }

        for stage in &stages {
            for dep in &stage.depends_on {
                if !index.contains_key(dep) {
                    return Err(LauncherError::graph(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.name, dep
                    )));
                }
                if dep == &stage.name {
                    return Err(LauncherError::graph(format!("stage '{}' depends on itself", dep)));
                }
            }
        }

        // Kahn's algorithm, always taking the earliest declared ready stage
        let mut placed = vec![false; stages.len()];
        let mut order = Vec::with_capacity(stages.len());
        while order.len() < stages.len() {
            let next = stages.iter().enumerate().find(|(i, stage)| {
                !placed[*i] && stage.depends_on.iter().all(|dep| placed[index[dep]])
            });
            match next {
                Some((i, _)) => {
                    placed[i] = true;
                    order.push(i);
                }
                None => {
                    let cyclic: Vec<String> = stages
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !placed[*i])
                        .map(|(_, s)| s.name.to_string())
                        .collect();
                    return Err(LauncherError::graph(format!(
                        "dependency cycle among: {}",
                        cyclic.join(", ")
                    )));
                }
            }
        }

        Ok(Self { stages, index, order })
    }

    pub fn get(&self, name: &StageName) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// All stage names
    pub fn names(&self) -> BTreeSet<StageName> {
        self.index.keys().cloned().collect()
    }

    /// Stages in start order
    pub fn start_order(&self) -> impl Iterator<Item = &Stage> {
        self.order.iter().map(move |&i| &self.stages[i])
    }

    /// Stages in stop order (reverse of start order)
    pub fn stop_order(&self) -> impl Iterator<Item = &Stage> {
        self.order.iter().rev().map(move |&i| &self.stages[i])
    }

    /// Start order restricted to `requested`
    ///
    /// Dependents of a stage left out of the request are kept; the caller
    /// owns the consistency of the subset.
    pub fn start_plan(&self, requested: &BTreeSet<StageName>) -> LauncherResult<Vec<&Stage>> {
        if let Some(unknown) = requested.iter().find(|name| !self.index.contains_key(*name)) {
            return Err(LauncherError::graph(format!("unknown stage '{}' requested", unknown)));
        }
        Ok(self
            .start_order()
            .filter(|stage| requested.contains(&stage.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Environment;

    fn name(s: &str) -> StageName {
        StageName::new(s).unwrap()
    }

    fn service(stage: &str, deps: &[&str]) -> Stage {
        let spec = ServiceSpec::new(
            stage,
            vec!["true".to_string()],
            "/",
            Environment::default(),
            format!("/tmp/{stage}.log"),
        )
        .unwrap()
        .depends_on(deps.iter().map(|d| name(d)));
        Stage::service(name(stage), spec)
    }

    fn names<'a>(stages: impl Iterator<Item = &'a Stage>) -> Vec<String> {
        stages.map(|s| s.name().to_string()).collect()
    }

    #[test]
    fn test_declaration_order_is_kept_when_consistent() {
        let graph = StageGraph::new(vec![
            service("auth", &[]),
            service("compute", &["auth"]),
            service("store", &["auth", "compute"]),
        ])
        .unwrap();

        assert_eq!(names(graph.start_order()), vec!["auth", "compute", "store"]);
        assert_eq!(names(graph.stop_order()), vec!["store", "compute", "auth"]);
    }

    #[test]
    fn test_dependencies_reorder_declarations() {
        let graph = StageGraph::new(vec![
            service("store", &["auth"]),
            service("auth", &[]),
        ])
        .unwrap();

        assert_eq!(names(graph.start_order()), vec!["auth", "store"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = StageGraph::new(vec![service("a", &["b"]), service("b", &["a"])]);
        assert!(matches!(result, Err(LauncherError::DependencyGraph { .. })));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let result = StageGraph::new(vec![service("a", &["ghost"])]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("unknown stage 'ghost'"));
    }

    #[test]
    fn test_duplicate_stage_is_rejected() {
        let result = StageGraph::new(vec![service("a", &[]), service("a", &[])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_start_plan_skips_unrequested_but_keeps_dependents() {
        let graph = StageGraph::new(vec![
            service("A", &[]),
            service("B", &["A"]),
            service("C", &["A", "B"]),
        ])
        .unwrap();

        let requested: BTreeSet<_> = [name("A"), name("C")].into_iter().collect();
        let plan = graph.start_plan(&requested).unwrap();
        assert_eq!(names(plan.into_iter()), vec!["A", "C"]);
    }

    #[test]
    fn test_start_plan_rejects_unknown_stage() {
        let graph = StageGraph::new(vec![service("A", &[])]).unwrap();
        let requested: BTreeSet<_> = [name("Z")].into_iter().collect();
        assert!(graph.start_plan(&requested).is_err());
    }

    #[test]
    fn test_service_stage_without_url_settles() {
        let stage = service("insight", &[]);
        assert_eq!(stage.readiness(), &Readiness::Settle(DEFAULT_SETTLE_DELAY));
        assert_eq!(stage.liveness_url(), None);
        assert_eq!(stage.units().len(), 1);
    }
}
