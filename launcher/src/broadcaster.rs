//! Health aggregator and discovery broadcaster
//!
//! Runs beside the started deployment. Each tick polls the HTTP targets,
//! ages out stale heartbeats, folds everything into one health flag and
//! re-advertises the discovery record only when it changed. Heartbeats
//! arrive concurrently through the message bus listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use shared::{component_debug, component_error, component_info, ComponentId};

use crate::core::health::{
    BroadcastState, DescriptorTemplate, DiscoveryDescriptor, HealthRecords, HeartbeatRouter,
};
use crate::error::LauncherResult;
use crate::traits::{BusMessage, DiscoveryRegistrar, HttpProbe, MessageBus, ProbePredicate};

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_STALENESS: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub interval: Duration,
    pub staleness: Duration,
    pub probe_timeout: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_INTERVAL,
            staleness: DEFAULT_HEARTBEAT_STALENESS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

pub struct HealthAggregator<H, B, D>
where
    H: HttpProbe,
    B: MessageBus,
    D: DiscoveryRegistrar,
{
    /// Shared with the listener task; never held across I/O
    records: Arc<Mutex<HealthRecords>>,
    router: Arc<HeartbeatRouter>,
    template: DescriptorTemplate,
    probe: H,
    bus: B,
    registrar: D,
    settings: AggregatorSettings,
    broadcast: Mutex<BroadcastState>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl<H, B, D> HealthAggregator<H, B, D>
where
    H: HttpProbe,
    B: MessageBus,
    D: DiscoveryRegistrar,
{
    pub fn new(
        records: HealthRecords,
        router: HeartbeatRouter,
        template: DescriptorTemplate,
        probe: H,
        bus: B,
        registrar: D,
    ) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            router: Arc::new(router),
            template,
            probe,
            bus,
            registrar,
            settings: AggregatorSettings::default(),
            broadcast: Mutex::new(BroadcastState::default()),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: AggregatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Tie the tick loop and listener to an outer cancellation token
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn settings(&self) -> AggregatorSettings {
        self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Copy of the current per-target flags
    pub async fn records(&self) -> HealthRecords {
        self.records.lock().await.clone()
    }

    pub async fn last_broadcast(&self) -> Option<DiscoveryDescriptor> {
        self.broadcast.lock().await.last().cloned()
    }

    /// Subscribe to the heartbeat topics and record inbound messages in the background
    pub async fn start_listener(&self) -> LauncherResult<JoinHandle<()>> {
        let mut rx = self.bus.subscribe(self.router.topics()).await?;
        let records = Arc::clone(&self.records);
        let router = Arc::clone(&self.router);
        let cancel = self.cancel.clone();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => {
                            record_message(&records, &router, &message, Instant::now()).await;
                        }
                        None => break,
                    },
                }
            }
            component_debug!(ComponentId::Health, "Heartbeat listener finished");
        }))
    }

    /// Record one inbound message; false when it was discarded
    pub async fn ingest(&self, message: &BusMessage) -> bool {
        record_message(&self.records, &self.router, message, Instant::now()).await
    }

    /// One aggregation pass; true when a new descriptor was broadcast
    pub async fn tick(&self) -> bool {
        let targets = self.records.lock().await.polled_targets();

        let mut results = Vec::with_capacity(targets.len());
        for (id, url) in targets {
            let healthy = self
                .probe
                .status(&url, self.settings.probe_timeout)
                .await
                .is_some_and(|status| ProbePredicate::PolledLiveness.accepts(status));
            results.push((id, healthy));
        }

        let descriptor = {
            let mut records = self.records.lock().await;
            for (id, healthy) in &results {
                records.set_polled(id, *healthy);
            }
            records.refresh_heartbeats(Instant::now(), self.settings.staleness);
            self.template.build(&records)
        };

        component_debug!(
            ComponentId::Health,
            "Health tick: healthy={} failing=[{}]",
            descriptor.healthy,
            descriptor.failing.join(",")
        );

        // Held through register so stop() cannot interleave with it
        let mut broadcast = self.broadcast.lock().await;
        if self.cancel.is_cancelled() {
            component_debug!(ComponentId::Health, "Aggregator stopped, skipping broadcast");
            return false;
        }
        if !broadcast.update(&descriptor) {
            return false;
        }

        if let Err(e) = self.registrar.register(&descriptor).await {
            component_error!(ComponentId::Health, "❌ Failed to broadcast status: {}", e);
        }
        true
    }

    /// Tick every `interval` until stopped or cancelled
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        component_info!(
            ComponentId::Health,
            "💓 Health monitoring started (every {:?})",
            self.settings.interval
        );

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    self.tick().await;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        component_info!(ComponentId::Health, "Health monitoring loop exited");
    }

    /// Stop the loop, withdraw the registration and drop the bus connection
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        // Waits for an in-flight registration; later ticks see the cancellation
        let _broadcast = self.broadcast.lock().await;
        if let Err(e) = self.registrar.unregister().await {
            component_error!(ComponentId::Health, "❌ Failed to withdraw discovery registration: {}", e);
        }
        if let Err(e) = self.bus.disconnect().await {
            component_debug!(ComponentId::Health, "Bus disconnect failed: {}", e);
        }
        component_info!(ComponentId::Health, "🛑 Health monitoring stopped");
    }
}

async fn record_message(
    records: &Mutex<HealthRecords>,
    router: &HeartbeatRouter,
    message: &BusMessage,
    at: Instant,
) -> bool {
    match router.route(&message.topic, &message.payload) {
        Ok(target) => {
            let recorded = records.lock().await.record_heartbeat(&target, at);
            if !recorded {
                component_debug!(ComponentId::Health, "Heartbeat for untracked target {} ignored", target);
            }
            recorded
        }
        Err(rejection) => {
            component_debug!(
                ComponentId::Health,
                "Discarded message on {}: {:?}",
                message.topic,
                rejection
            );
            false
        }
    }
}
