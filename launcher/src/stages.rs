//! CL server deployment layout
//!
//! Turns a [`LauncherConfig`] into the stage graph, the health targets and
//! the discovery template. Declaration order: auth, compute, store,
//! workers, insight.

use std::collections::BTreeSet;
use std::path::PathBuf;

use shared::{Environment, ServiceSpec, StageName};

use crate::config::LauncherConfig;
use crate::core::graph::{Readiness, Stage, StageGraph};
use crate::core::health::{worker_target, DescriptorTemplate, HealthRecords, HeartbeatRouter, INSIGHT_TARGET};
use crate::error::{LauncherError, LauncherResult};

pub const AUTH: &str = "auth";
pub const COMPUTE: &str = "compute";
pub const STORE: &str = "store";
pub const WORKERS: &str = "workers";
pub const INSIGHT: &str = "insight";

const COMPUTE_ADMIN_USER: &str = "admin";
const COMPUTE_ADMIN_PASSWORD: &str = "admin";

fn stage_name(name: &str) -> LauncherResult<StageName> {
    Ok(StageName::new(name)?)
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Unit name of the worker with `id`
pub fn worker_unit_name(id: &str) -> String {
    format!("worker-{id}")
}

/// Build the full stage graph for `config`
pub fn build_stages(config: &LauncherConfig, env: &Environment) -> LauncherResult<StageGraph> {
    let log_dir = &config.data.log_dir;
    let settle = config.timing.settle_delay();
    let auth = stage_name(AUTH)?;
    let compute = stage_name(COMPUTE)?;
    let store = stage_name(STORE)?;

    let auth_port = config.ports.auth.to_string();
    let compute_port = config.ports.compute.to_string();
    let store_port = config.ports.store.to_string();

    let auth_spec = ServiceSpec::new(
        AUTH,
        command(&["uv", "run", "auth-server", "--port", &auth_port]),
        &config.paths.auth_dir,
        env.clone(),
        log_dir.join("auth.log"),
    )?
    .with_readiness_url(config.auth_url());

    // compute loads auth's cached public key before it can serve
    let compute_spec = ServiceSpec::new(
        COMPUTE,
        command(&["uv", "run", "compute-server", "--port", &compute_port]),
        &config.paths.compute_dir,
        env.clone(),
        log_dir.join("compute.log"),
    )?
    .depends_on([auth.clone()])
    .with_readiness_url(config.compute_url());

    let auth_url = config.auth_url();
    let compute_url = config.compute_url();
    let store_spec = ServiceSpec::new(
        STORE,
        command(&[
            "uv",
            "run",
            "store",
            "--port",
            &store_port,
            "--auth-url",
            &auth_url,
            "--compute-url",
            &compute_url,
            "--compute-username",
            COMPUTE_ADMIN_USER,
            "--compute-password",
            COMPUTE_ADMIN_PASSWORD,
        ]),
        &config.paths.store_dir,
        env.clone(),
        log_dir.join("store.log"),
    )?
    .depends_on([auth.clone(), compute.clone()])
    .with_readiness_url(config.store_url());

    let mut stages = vec![
        Stage::service(auth.clone(), auth_spec).with_port(config.ports.auth),
        Stage::service(compute.clone(), compute_spec)
            .with_port(config.ports.compute)
            .with_settle_after(settle),
        Stage::service(store.clone(), store_spec)
            .with_port(config.ports.store)
            .with_settle_after(settle),
    ];

    if !config.workers.is_empty() {
        let mut workers = Vec::with_capacity(config.workers.len());
        for (i, worker) in config.workers.iter().enumerate() {
            let tasks = worker.tasks.join(",");
            workers.push(ServiceSpec::new(
                worker_unit_name(&worker.id),
                command(&[
                    "uv",
                    "run",
                    "compute-worker",
                    "--worker-id",
                    &worker.id,
                    "--port",
                    &compute_port,
                    "--tasks",
                    &tasks,
                ]),
                &worker.dir,
                env.clone(),
                log_dir.join(format!("worker-{i}.log")),
            )?);
        }
        stages.push(Stage::worker_pool(stage_name(WORKERS)?, [auth, compute], workers));
    }

    if let Some(insight_dir) = &config.paths.insight_dir {
        let spec = ServiceSpec::new(
            INSIGHT,
            command(&[
                "uv",
                "run",
                "m-insight-worker",
                "--store-port",
                &store_port,
                "--mqtt-url",
                &config.broker.url,
            ]),
            insight_dir,
            env.clone(),
            log_dir.join("m_insight.log"),
        )?
        .depends_on([store]);
        stages.push(Stage::service(stage_name(INSIGHT)?, spec).with_readiness(Readiness::Settle(settle)));
    }

    StageGraph::new(stages)
}

/// Parse a comma-separated `--stages` value
pub fn parse_stage_list(raw: &str) -> LauncherResult<BTreeSet<StageName>> {
    let stages = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<StageName>().map_err(LauncherError::from))
        .collect::<LauncherResult<BTreeSet<_>>>()?;
    if stages.is_empty() {
        return Err(LauncherError::config("--stages must name at least one stage"));
    }
    Ok(stages)
}

/// Services migrated before startup, in order
pub fn migration_targets(config: &LauncherConfig) -> Vec<(String, PathBuf)> {
    vec![
        (AUTH.to_string(), config.paths.auth_dir.clone()),
        (STORE.to_string(), config.paths.store_dir.clone()),
        (COMPUTE.to_string(), config.paths.compute_dir.clone()),
    ]
}

/// Targets the health aggregator tracks
pub fn health_records(config: &LauncherConfig) -> HealthRecords {
    let mut records = HealthRecords::new();
    records.add_polled(AUTH, config.auth_url());
    records.add_polled(STORE, config.store_url());
    records.add_polled(COMPUTE, config.compute_url());
    if config.discovery.monitor_insight {
        records.add_pushed(INSIGHT_TARGET);
    }
    for worker in &config.workers {
        records.add_pushed(worker_target(&worker.id));
    }
    records
}

pub fn heartbeat_router(config: &LauncherConfig) -> HeartbeatRouter {
    HeartbeatRouter::new(
        config.ports.store,
        config.broker.capability_topic_prefix.clone(),
        config.workers.iter().map(|worker| worker.id.clone()),
    )
}

pub fn descriptor_template(config: &LauncherConfig) -> DescriptorTemplate {
    DescriptorTemplate {
        service_name: config.discovery.service_name.clone(),
        service_type: config.discovery.service_type.clone(),
        port: config.advertised_port(),
        description: config.discovery.description.clone(),
        endpoints: vec![
            ("auth_url".to_string(), config.auth_url()),
            ("store_url".to_string(), config.store_url()),
            ("compute_url".to_string(), config.compute_url()),
            ("mqtt_url".to_string(), config.broker.url.clone()),
        ],
    }
}
