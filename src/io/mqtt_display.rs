//! MQTT availability publisher
//!
//! Publishes a retained JSON status to the configured topic whenever the
//! committed count changes, so late subscribers (signage, dashboards)
//! get the current value on connect:
//!
//! `{"site": "lot-a", "available": 2, "total": 3, "updated_at": "..."}`

use crate::infra::config::Config;
use crate::io::display::AvailabilityDisplay;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
pub struct AvailabilityPayload<'a> {
    pub site: &'a str,
    pub available: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
}

pub struct MqttDisplay {
    client: AsyncClient,
    topic: String,
    site: String,
    last: Option<(usize, usize)>,
}

impl MqttDisplay {
    /// Create the publisher and spawn its event loop.
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("parking-monitor-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 16);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_display_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_display_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_display_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(topic = %config.mqtt_topic(), "mqtt_display_started");

        Self {
            client,
            topic: config.mqtt_topic().to_string(),
            site: config.site_id().to_string(),
            last: None,
        }
    }
}

impl AvailabilityDisplay for MqttDisplay {
    fn show(&mut self, available: usize, total: usize) -> anyhow::Result<()> {
        if self.last == Some((available, total)) {
            return Ok(());
        }

        let payload = AvailabilityPayload {
            site: &self.site,
            available,
            total,
            updated_at: Utc::now(),
        };
        let body = serde_json::to_vec(&payload)?;

        // Non-blocking; a full request queue drops this update and the next
        // change is retried on the following cycle.
        self.client.try_publish(&self.topic, QoS::AtLeastOnce, true, body)?;
        self.last = Some((available, total));
        debug!(topic = %self.topic, available = available, total = total, "mqtt_availability_published");
        Ok(())
    }
}
