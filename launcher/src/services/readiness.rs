//! Startup readiness gate
//!
//! Polls a stage's HTTP endpoint until it answers 2xx or the overall
//! timeout elapses. Only used while starting stages.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use shared::{component_debug, ComponentId};

use crate::error::{LauncherError, LauncherResult};
use crate::traits::{HttpProbe, ProbePredicate, ReadinessCheck};

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ReadinessGate<H: HttpProbe> {
    probe: H,
    timeout: Duration,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl<H: HttpProbe> ReadinessGate<H> {
    pub fn new(probe: H) -> Self {
        Self {
            probe,
            timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overall window for one stage (fluent API)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay between attempts (fluent API)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Per-request timeout (fluent API)
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<H: HttpProbe> ReadinessCheck for ReadinessGate<H> {
    async fn await_ready(&self, url: &str) -> LauncherResult<()> {
        let started = Instant::now();
        let mut attempts = 0u32;

        while started.elapsed() < self.timeout {
            attempts += 1;
            match self.probe.status(url, self.request_timeout).await {
                Some(status) if ProbePredicate::Ready.accepts(status) => {
                    component_debug!(
                        ComponentId::Supervisor,
                        "✅ {} ready after {} attempt(s) (HTTP {})",
                        url,
                        attempts,
                        status
                    );
                    return Ok(());
                }
                Some(status) => {
                    component_debug!(ComponentId::Supervisor, "⏳ {} answered HTTP {}", url, status);
                }
                None => {
                    component_debug!(ComponentId::Supervisor, "⏳ {} not reachable yet", url);
                }
            }
            sleep(self.poll_interval).await;
        }

        Err(LauncherError::ReadinessTimeout {
            url: url.to_string(),
            timeout: self.timeout,
        })
    }
}
