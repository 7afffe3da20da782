//! MQTT transport on top of rumqttc.

use crate::config::Config;
use crate::defaults;
use crate::error::{Result, WakeError};
use crate::hermes::topics;
use crate::transport::{Transport, TransportEvent};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long `close` keeps the event loop running to send queued messages.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker connection with automatic reconnect.
///
/// rumqttc reconnects whenever the event loop is polled after an error;
/// this wrapper spaces those attempts by the configured delay and reports
/// the transitions as [`TransportEvent`]s.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    reconnect_delay: Duration,
    retry_at: Option<Instant>,
    connected: bool,
}

impl MqttTransport {
    pub fn new(config: &Config) -> Self {
        let mut options = MqttOptions::new(config.client_id(), &config.mqtt.host, config.mqtt.port);
        options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs.max(5)));
        // Persistent session so QoS 1 commands queued during a drop are delivered
        options.set_clean_session(false);

        let (client, eventloop) = AsyncClient::new(options, defaults::MQTT_REQUEST_CAPACITY);
        info!(
            host = %config.mqtt.host,
            port = config.mqtt.port,
            client_id = %config.client_id(),
            "MQTT transport created"
        );

        Self {
            client,
            eventloop,
            reconnect_delay: config.mqtt.reconnect_delay(),
            retry_at: None,
            connected: false,
        }
    }
}

/// Audio is fire-and-forget; everything else is at-least-once.
fn qos_for(topic: &str) -> QoS {
    if topic.starts_with(topics::AUDIO_FRAME_PREFIX) {
        QoS::AtMostOnce
    } else {
        QoS::AtLeastOnce
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        for topic in topics {
            self.client
                .try_subscribe(topic.as_str(), qos_for(topic))
                .map_err(|e| WakeError::Transport {
                    message: format!("Failed to subscribe to {}: {}", topic, e),
                })?;
            debug!(topic = %topic, "Subscribed");
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, qos_for(topic), false, payload)
            .map_err(|e| WakeError::Transport {
                message: format!("Failed to publish on {}: {}", topic, e),
            })
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(retry_at) = self.retry_at {
                tokio::time::sleep_until(retry_at).await;
                self.retry_at = None;
            }

            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.connected = true;
                    return Some(TransportEvent::Connected);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    self.retry_at = Some(Instant::now() + self.reconnect_delay);
                    if self.connected {
                        self.connected = false;
                        return Some(TransportEvent::Disconnected {
                            reason: e.to_string(),
                        });
                    }
                    warn!(
                        error = %e,
                        "MQTT connection failed, retrying in {}ms",
                        self.reconnect_delay.as_millis()
                    );
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.client.try_disconnect().map_err(|e| WakeError::Transport {
            message: format!("Failed to disconnect: {}", e),
        })?;

        // Requests go out in order, so the disconnect trails every publish
        let eventloop = &mut self.eventloop;
        let drain = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            warn!("Timed out flushing MQTT messages");
        }
        self.connected = false;
        Ok(())
    }
}
