//! # MQTT Transport
//!
//! One rumqttc connection per worker. The event loop runs in a background
//! task that forwards publishes into the subscription channel and surfaces
//! connectivity changes on the status stream; broker errors are reported
//! and retried, never fatal.

use crate::transport::{
    BusConnector, BusError, BusFrame, BusSubscription, BusTransport, TransportStatus,
};
use async_trait::async_trait;
use edgelink_types::BusConfig;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

/// Frames buffered per subscription before back-pressure.
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Delay before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Broker keep-alive interval.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Parse `mqtt://host:port`, `host:port` or bare `host` broker URLs.
fn parse_broker_url(url: &str) -> (String, u16) {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    match stripped.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (stripped.to_string(), 1883),
        },
        None => (stripped.to_string(), 1883),
    }
}

/// A single MQTT connection and its event-loop task.
pub struct MqttTransport {
    client: AsyncClient,
    frames: Mutex<Option<mpsc::Receiver<BusFrame>>>,
    status: broadcast::Sender<TransportStatus>,
    closed: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Connect to the broker with the given client id.
    pub async fn connect(config: &BusConfig, client_id: &str) -> Result<Arc<Self>, BusError> {
        let (host, port) = parse_broker_url(&config.url);

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_clean_session(config.clean);
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, FRAME_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(16);
        let closed = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(Self {
            client,
            frames: Mutex::new(Some(frame_rx)),
            status: status_tx.clone(),
            closed: closed.clone(),
        });

        let loop_client_id = client_id.to_string();
        tokio::spawn(async move {
            let mut was_connected = false;
            loop {
                if closed.load(Ordering::Relaxed) {
                    break;
                }
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        was_connected = true;
                        let _ = status_tx.send(TransportStatus {
                            connected: true,
                            detail: "connected".to_string(),
                        });
                        debug!(client_id = %loop_client_id, "broker connection established");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let frame = BusFrame {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if frame_tx.send(frame).await.is_err() {
                            // Subscriber gone; nothing left to deliver to.
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        if closed.load(Ordering::Relaxed) {
                            break;
                        }
                        if was_connected {
                            was_connected = false;
                            let _ = status_tx.send(TransportStatus {
                                connected: false,
                                detail: error.to_string(),
                            });
                        }
                        warn!(client_id = %loop_client_id, error = %error, "bus connection error, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok(transport)
    }
}

#[async_trait]
impl BusTransport for MqttTransport {
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let receiver = {
            let mut slot = self.frames.lock().await;
            slot.take().ok_or(BusError::AlreadySubscribed)?
        };

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::SubscribeFailed {
                topic: topic.to_string(),
                detail: e.to_string(),
            })?;

        Ok(BusSubscription::new(topic.to_string(), receiver))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::Closed);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::PublishFailed {
                topic: topic.to_string(),
                detail: e.to_string(),
            })
    }

    fn status(&self) -> broadcast::Receiver<TransportStatus> {
        self.status.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.client.disconnect().await;
    }
}

/// Mints one MQTT connection per worker from shared credentials.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: BusConfig,
}

impl MqttConnector {
    /// Wrap the configured credentials.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    async fn connect(&self, client_id: &str) -> Result<Arc<dyn BusTransport>, BusError> {
        let transport = MqttTransport::connect(&self.config, client_id).await?;
        Ok(transport)
    }
}
