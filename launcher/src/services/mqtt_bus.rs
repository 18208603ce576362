//! MQTT message bus adapter
//!
//! Wraps a rumqttc client and its event loop. Inbound publishes are
//! forwarded to a channel owned by the subscriber; subscriptions are
//! re-issued on every (re)connect because sessions are clean.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use shared::{component_debug, component_info, component_warn, ComponentId};

use crate::error::{LauncherError, LauncherResult};
use crate::traits::{BusMessage, MessageBus};

const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(15);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CHANNEL_CAPACITY: usize = 256;

pub struct MqttBus {
    options: MqttOptions,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Build from a broker URL such as `mqtt://localhost:1883`
    pub fn from_url(broker_url: &str) -> LauncherResult<Self> {
        let (host, port) = parse_broker_url(broker_url)?;
        let client_id = format!("cl-launcher-health-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);

        Ok(Self {
            options,
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
        })
    }
}

/// Extract host and port; `mqtt` and `tcp` schemes are accepted
pub fn parse_broker_url(broker_url: &str) -> LauncherResult<(String, u16)> {
    let url = Url::parse(broker_url)
        .map_err(|e| LauncherError::config(format!("broker.url '{broker_url}': {e}")))?;
    if !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(LauncherError::config(format!(
            "broker.url '{broker_url}': unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| LauncherError::config(format!("broker.url '{broker_url}': missing host")))?;
    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn subscribe(&self, topics: Vec<String>) -> LauncherResult<mpsc::Receiver<BusMessage>> {
        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), 64);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let subscriber = client.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        for topic in &topics {
                            if let Err(e) = subscriber.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                                component_warn!(ComponentId::Health, "⚠️ Subscribe to {} failed: {}", topic, e);
                            }
                        }
                        component_info!(ComponentId::Health, "📡 Subscribed to MQTT topics: {}", topics.join(", "));
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BusMessage::new(publish.topic.clone(), publish.payload.to_vec());
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        component_debug!(ComponentId::Health, "MQTT connection error: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        *self.client.lock().await = Some(client);
        if let Some(previous) = self.event_loop.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn disconnect(&self) -> LauncherResult<()> {
        let client = self.client.lock().await.take();
        let result = match client {
            Some(client) => client.disconnect().await.map_err(LauncherError::bus),
            None => Ok(()),
        };
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        result
    }
}
