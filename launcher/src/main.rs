//! Main entry point for the launcher binary
//!
//! Wires the real service implementations into the orchestrator and the
//! health aggregator, then waits for a termination signal.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use launcher::{
    broadcaster::DEFAULT_PROBE_TIMEOUT,
    services::{
        migrations::run_migrations, CommandMigrator, DnsSdRegistrar, MqttBus, PortReconciler, RealProcessSupervisor,
        ReadinessGate, ReqwestProbe,
    },
    signals, stages, AggregatorSettings, HealthAggregator, LauncherConfig, StartupOrchestrator,
};
use shared::{component_info, component_warn, logging, ComponentId, EnvironmentBuilder};

type Aggregator = HealthAggregator<ReqwestProbe, MqttBus, DnsSdRegistrar>;

/// Starts, monitors and stops the CL server services
#[derive(Parser)]
#[command(name = "launcher")]
#[command(about = "Starts the CL server services in dependency order and advertises their health")]
pub struct Args {
    /// Path to the launcher TOML configuration
    #[arg(long)]
    pub config: PathBuf,

    /// Comma-separated subset of stages to start (default: all)
    #[arg(long)]
    pub stages: Option<String>,

    /// Terminate processes occupying required ports instead of aborting
    #[arg(long)]
    pub force: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Do not run the health aggregator
    #[arg(long)]
    pub no_health: bool,

    /// Do not run database migrations before starting
    #[arg(long)]
    pub skip_migrations: bool,
}

struct HealthMonitor {
    aggregator: Arc<Aggregator>,
    ticker: JoinHandle<()>,
    listener: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    async fn start(aggregator: Aggregator) -> Self {
        let aggregator = Arc::new(aggregator);
        let listener = match aggregator.start_listener().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                logging::log_error(ComponentId::Health, "Heartbeat subscription", &e);
                None
            }
        };
        let ticker = tokio::spawn({
            let aggregator = Arc::clone(&aggregator);
            async move { aggregator.run().await }
        });
        Self {
            aggregator,
            ticker,
            listener,
        }
    }

    async fn stop(self) {
        self.aggregator.stop().await;
        let _ = self.ticker.await;
        if let Some(listener) = self.listener {
            let _ = listener.await;
        }
    }
}

fn build_aggregator(config: &LauncherConfig, shutdown: &CancellationToken) -> anyhow::Result<Aggregator> {
    let bus = MqttBus::from_url(&config.broker.url).context("invalid broker configuration")?;
    let settings = AggregatorSettings {
        interval: config.timing.health_interval(),
        staleness: config.timing.heartbeat_staleness(),
        probe_timeout: DEFAULT_PROBE_TIMEOUT,
    };
    Ok(HealthAggregator::new(
        stages::health_records(config),
        stages::heartbeat_router(config),
        stages::descriptor_template(config),
        ReqwestProbe::new(),
        bus,
        DnsSdRegistrar::new(),
    )
    .with_settings(settings)
    .with_cancellation(shutdown))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(Some(&args.log_level));
    dotenv::dotenv().ok();
    logging::log_startup(ComponentId::Launcher, "CL server launcher");

    let config = LauncherConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    std::fs::create_dir_all(&config.data.dir)
        .with_context(|| format!("failed to create data directory {}", config.data.dir.display()))?;
    let env = EnvironmentBuilder::from_current()
        .set("CL_SERVER_DIR", config.data.dir.display().to_string())
        .build()?;

    if args.skip_migrations || !config.migrations.enabled {
        component_info!(ComponentId::Launcher, "⏭️  Skipping database migrations");
    } else {
        let migrator =
            CommandMigrator::new(config.migrations.command.clone(), env.clone())?.with_timeout(config.migrations.timeout());
        run_migrations(&migrator, &stages::migration_targets(&config))
            .await
            .context("database migrations failed")?;
    }

    let graph = stages::build_stages(&config, &env)?;
    let requested = match args.stages.as_deref() {
        Some(raw) => stages::parse_stage_list(raw)?,
        None => graph.names(),
    };

    let shutdown = CancellationToken::new();
    let signal_listener = signals::install_signal_handlers(shutdown.clone())?;

    let aggregator = if args.no_health || !config.discovery.enabled {
        None
    } else {
        Some(build_aggregator(&config, &shutdown)?)
    };

    let readiness = ReadinessGate::new(ReqwestProbe::new()).with_timeout(config.timing.readiness_timeout());
    let mut orchestrator = StartupOrchestrator::new(
        graph,
        RealProcessSupervisor::new(ReqwestProbe::new()),
        readiness,
        PortReconciler::new(),
    )
    .with_stop_timeout(config.timing.stop_timeout());

    if let Err(e) = orchestrator.start(&requested, args.force).await {
        signal_listener.abort();
        return Err(e).context("startup failed, all started services were stopped");
    }

    let health = match aggregator {
        Some(aggregator) => Some(HealthMonitor::start(aggregator).await),
        None => None,
    };

    logging::log_success(ComponentId::Launcher, "All services started. Press Ctrl+C to stop.");
    shutdown.cancelled().await;

    if let Some(health) = health {
        health.stop().await;
    }
    let summary = orchestrator.stop_all().await;
    let _ = signal_listener.await;

    if summary.is_clean() {
        logging::log_success(ComponentId::Launcher, "All services stopped");
    } else {
        component_warn!(
            ComponentId::Launcher,
            "⚠️ Shutdown finished with {} failure(s); check for leftover processes",
            summary.failures.len()
        );
    }
    Ok(())
}
