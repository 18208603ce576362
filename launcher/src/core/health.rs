//! Health state shared by the polling loop and the heartbeat listener
//!
//! Pure bookkeeping: no I/O happens here. `HealthRecords` is always
//! accessed under the broadcaster's single lock.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

/// Target id used for the insight worker's heartbeats
pub const INSIGHT_TARGET: &str = "m_insight";

/// Status values the insight worker reports while healthy
pub const ACTIVE_STATUSES: &[&str] = &["running", "idle"];

/// Target id for a declared compute worker
pub fn worker_target(worker_id: &str) -> String {
    format!("worker:{worker_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// Checked by HTTP GET each tick
    Polled { url: String },
    /// Fed by asynchronous heartbeats
    Pushed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub healthy: bool,
    pub last_heartbeat: Option<Instant>,
    pub source: TargetSource,
}

/// Per-target health flags keyed by target id
#[derive(Debug, Clone, Default)]
pub struct HealthRecords {
    records: BTreeMap<String, HealthRecord>,
}

impl HealthRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_polled(&mut self, id: impl Into<String>, url: impl Into<String>) {
        self.records.insert(
            id.into(),
            HealthRecord {
                healthy: false,
                last_heartbeat: None,
                source: TargetSource::Polled { url: url.into() },
            },
        );
    }

    pub fn add_pushed(&mut self, id: impl Into<String>) {
        self.records.insert(
            id.into(),
            HealthRecord {
                healthy: false,
                last_heartbeat: None,
                source: TargetSource::Pushed,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&HealthRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(id, url)` of every HTTP-checked target
    pub fn polled_targets(&self) -> Vec<(String, String)> {
        self.records
            .iter()
            .filter_map(|(id, record)| match &record.source {
                TargetSource::Polled { url } => Some((id.clone(), url.clone())),
                TargetSource::Pushed => None,
            })
            .collect()
    }

    /// Store a poll result; ignored for pushed or unknown targets
    pub fn set_polled(&mut self, id: &str, healthy: bool) {
        if let Some(record) = self.records.get_mut(id) {
            if matches!(record.source, TargetSource::Polled { .. }) {
                record.healthy = healthy;
            }
        }
    }

    /// Store a heartbeat; returns false for polled or unknown targets
    pub fn record_heartbeat(&mut self, id: &str, at: Instant) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.source == TargetSource::Pushed => {
                record.last_heartbeat = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Recompute pushed targets: healthy iff the last heartbeat is fresher than `staleness`
    pub fn refresh_heartbeats(&mut self, now: Instant, staleness: Duration) {
        for record in self.records.values_mut() {
            if record.source == TargetSource::Pushed {
                record.healthy = record
                    .last_heartbeat
                    .is_some_and(|at| now.saturating_duration_since(at) < staleness);
            }
        }
    }

    /// Logical AND over every target
    pub fn aggregate(&self) -> bool {
        self.records.values().all(|record| record.healthy)
    }

    /// Sorted ids of unhealthy targets
    pub fn failing(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| !record.healthy)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Service-presence record handed to the discovery registrar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDescriptor {
    pub service_name: String,
    pub service_type: String,
    pub domain: String,
    pub port: u16,
    pub healthy: bool,
    pub failing: Vec<String>,
    pub txt: Vec<String>,
}

/// Static part of the discovery record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorTemplate {
    pub service_name: String,
    pub service_type: String,
    pub port: u16,
    pub description: String,
    /// `(txt key, url)` pairs, e.g. `("auth_url", "http://localhost:8010")`
    pub endpoints: Vec<(String, String)>,
}

impl DescriptorTemplate {
    pub fn build(&self, records: &HealthRecords) -> DiscoveryDescriptor {
        let healthy = records.aggregate();
        let failing = records.failing();

        let mut txt = Vec::with_capacity(self.endpoints.len() + 3);
        txt.push(format!("desc={}", self.description));
        txt.extend(self.endpoints.iter().map(|(key, url)| format!("{key}={url}")));
        if !healthy {
            txt.push("status=unhealthy".to_string());
            txt.push(format!("error={}", failing.join(",")));
        }

        DiscoveryDescriptor {
            service_name: self.service_name.clone(),
            service_type: self.service_type.clone(),
            domain: "local".to_string(),
            port: self.port,
            healthy,
            failing,
            txt,
        }
    }
}

/// Last descriptor handed to the registrar
#[derive(Debug, Clone, Default)]
pub struct BroadcastState {
    last: Option<DiscoveryDescriptor>,
}

impl BroadcastState {
    /// Record `descriptor`; true when it differs from the previous one
    pub fn update(&mut self, descriptor: &DiscoveryDescriptor) -> bool {
        if self.last.as_ref() == Some(descriptor) {
            return false;
        }
        self.last = Some(descriptor.clone());
        true
    }

    pub fn last(&self) -> Option<&DiscoveryDescriptor> {
        self.last.as_ref()
    }
}

/// Reason an inbound message did not count as a heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatRejection {
    MalformedPayload(String),
    InactiveStatus(Option<String>),
    MissingWorkerId,
    UnexpectedWorker(String),
    UnknownTopic(String),
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapabilityPayload {
    worker_id: Option<String>,
}

/// Maps inbound bus messages to heartbeat target ids
#[derive(Debug, Clone)]
pub struct HeartbeatRouter {
    status_topic: String,
    capability_prefix: String,
    expected_workers: BTreeSet<String>,
}

impl HeartbeatRouter {
    pub fn new<I, S>(store_port: u16, capability_prefix: impl Into<String>, expected_workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status_topic: format!("mInsight/{store_port}/status"),
            capability_prefix: capability_prefix.into().trim_end_matches('/').to_string(),
            expected_workers: expected_workers.into_iter().map(Into::into).collect(),
        }
    }

    /// Topics to subscribe to: the status topic and the capability wildcard
    pub fn topics(&self) -> Vec<String> {
        vec![
            self.status_topic.clone(),
            format!("{}/+", self.capability_prefix),
        ]
    }

    pub fn expected_workers(&self) -> &BTreeSet<String> {
        &self.expected_workers
    }

    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<String, HeartbeatRejection> {
        if topic == self.status_topic {
            let parsed: StatusPayload = serde_json::from_slice(payload)
                .map_err(|e| HeartbeatRejection::MalformedPayload(e.to_string()))?;
            return match parsed.status {
                Some(status) if ACTIVE_STATUSES.contains(&status.as_str()) => {
                    Ok(INSIGHT_TARGET.to_string())
                }
                other => Err(HeartbeatRejection::InactiveStatus(other)),
            };
        }

        let is_capability = topic
            .strip_prefix(&self.capability_prefix)
            .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1);
        if is_capability {
            let parsed: CapabilityPayload = serde_json::from_slice(payload)
                .map_err(|e| HeartbeatRejection::MalformedPayload(e.to_string()))?;
            let worker_id = parsed.worker_id.ok_or(HeartbeatRejection::MissingWorkerId)?;
            if !self.expected_workers.contains(&worker_id) {
                return Err(HeartbeatRejection::UnexpectedWorker(worker_id));
            }
            return Ok(worker_target(&worker_id));
        }

        Err(HeartbeatRejection::UnknownTopic(topic.to_string()))
    }
}
