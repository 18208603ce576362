//! Test fixtures: stage definitions and configuration snippets

use launcher::{Readiness, Stage};
use shared::{Environment, EnvironmentBuilder, ServiceSpec, StageName};
use std::path::Path;
use std::time::Duration;

pub struct TestFixtures;

impl TestFixtures {
    pub const READY_TIMEOUT: Duration = Duration::from_secs(5);
    pub const SHORT_READY_TIMEOUT: Duration = Duration::from_millis(400);
    pub const STOP_TIMEOUT: Duration = Duration::from_millis(500);
    pub const SETTLE: Duration = Duration::from_millis(50);

    pub fn name(name: &str) -> StageName {
        StageName::new(name).expect("valid stage name")
    }

    /// Inherited environment plus the data directory variable
    pub fn env(data_dir: &Path) -> Environment {
        EnvironmentBuilder::from_current()
            .set("CL_SERVER_DIR", data_dir.display().to_string())
            .build()
            .expect("valid environment")
    }

    /// `sh -c <script>` unit logging into `dir`
    pub fn shell_spec(unit: &str, script: &str, dir: &Path, deps: &[&str]) -> ServiceSpec {
        ServiceSpec::new(
            unit,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            dir,
            Self::env(dir),
            dir.join("logs").join(format!("{unit}.log")),
        )
        .expect("valid spec")
        .depends_on(deps.iter().map(|d| Self::name(d)))
    }

    /// Long-running service gated on `ready_url`
    pub fn http_stage(stage: &str, ready_url: &str, dir: &Path, deps: &[&str]) -> Stage {
        let spec = Self::shell_spec(stage, "exec sleep 30", dir, deps).with_readiness_url(ready_url);
        Stage::service(Self::name(stage), spec)
    }

    /// Long-running service with a short settle delay instead of an HTTP check
    pub fn settle_stage(stage: &str, dir: &Path, deps: &[&str]) -> Stage {
        let spec = Self::shell_spec(stage, "exec sleep 30", dir, deps);
        Stage::service(Self::name(stage), spec).with_readiness(Readiness::Settle(Self::SETTLE))
    }

    /// Pool of `count` sleeping workers
    pub fn worker_pool(stage: &str, count: usize, dir: &Path, deps: &[&str]) -> Stage {
        let workers = (0..count)
            .map(|i| Self::shell_spec(&format!("worker-{i}"), "exec sleep 30", dir, &[]))
            .collect();
        Stage::worker_pool(Self::name(stage), deps.iter().map(|d| Self::name(d)), workers)
    }

    /// Launcher configuration pointing every service at the given ports
    pub fn config_toml(root: &Path, auth: u16, store: u16, compute: u16) -> String {
        format!(
            r#"
[paths]
auth_dir = "{root}/services/auth"
store_dir = "{root}/services/store"
compute_dir = "{root}/services/compute"

[ports]
auth = {auth}
store = {store}
compute = {compute}

[data]
dir = "{root}/data"
log_dir = "{root}/logs"

[[workers]]
id = "w1"
dir = "{root}/services/worker"
tasks = ["image_resize"]

[discovery]
monitor_insight = false
"#,
            root = root.display()
        )
    }
}
