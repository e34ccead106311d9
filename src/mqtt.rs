use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS};
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::{config, messages::PresenceEvent};

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct PresenceMqttMessage {
    name: String,
    id: String,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<i16>,
}

#[derive(Debug, Serialize, PartialEq)]
struct GateMqttMessage {
    state: &'static str,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "gate-opener".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config.topic_path.clone().unwrap_or("gate".to_string()),
            },
            eventloop,
        )
    }

    /// Keeps the connection alive. rumqttc reconnects on the next poll after
    /// an error, so this only backs off and logs.
    pub async fn event_loop(eventloop: &mut rumqttc::EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    debug!("Connection acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Publishes every presence notification until the sender side closes.
    pub async fn forward(&self, mut rx: broadcast::Receiver<PresenceEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(err) = self.announce(&event).await {
                        error!("Error publishing {:?}: {:?}", event, err);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Presence channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("MQTT forwarder lagged, skipped {} events", skipped);
                }
            }
        }
    }

    pub async fn announce(&self, event: &PresenceEvent) -> anyhow::Result<()> {
        let (topic, payload) = self.render(event)?;
        info!("Announcing {} on MQTT topic {}", event, topic);
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    fn render(&self, event: &PresenceEvent) -> serde_json::Result<(String, String)> {
        let device_topic = |name: &str| {
            format!("{}/{}/{}", self.topic_path, self.publisher_id, sanitize_name(name))
        };
        let gate_topic = format!("{}/{}/gate", self.topic_path, self.publisher_id);

        Ok(match event {
            PresenceEvent::Entered { id, name, rssi } => (
                device_topic(name),
                serde_json::to_string(&PresenceMqttMessage {
                    name: name.clone(),
                    id: id.to_string(),
                    state: "home",
                    rssi: Some(*rssi),
                })?,
            ),
            PresenceEvent::Exited { id, name } => (
                device_topic(name),
                serde_json::to_string(&PresenceMqttMessage {
                    name: name.clone(),
                    id: id.to_string(),
                    state: "not_home",
                    rssi: None,
                })?,
            ),
            PresenceEvent::GateMoving => (
                gate_topic,
                serde_json::to_string(&GateMqttMessage { state: "moving" })?,
            ),
            PresenceEvent::GateStopped => (
                gate_topic,
                serde_json::to_string(&GateMqttMessage { state: "stopped" })?,
            ),
        })
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
