/**
 * MQTT UPSTREAM - Real sync target and SMS gateway of the kernel
 *
 * ROLE :
 * Buffered operations and outbound SMS leave the kernel as MQTT messages
 * picked up by the ERP bridge and the carrier SMS plugin.
 *
 * TOPICS :
 * - {prefix}/sync/{device_id}/item@v1   one buffered item (QoS 1)
 * - {prefix}/sms/outbound@v1            one SMS to deliver (QoS 1)
 *
 * Publishes are refused while the broker session is down.
 * The attempt succeeds once the client accepted the publish; the
 * processor bounds it with its per-item timeout.
 */

use crate::buffer::BufferedItem;
use crate::config::MqttConf;
use crate::fallback::{GatewayError, OutboundSms, SmsGateway};
use crate::health::HealthTracker;
use crate::sync::{SyncFailure, SyncTarget};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemEnvelope<'a> {
    device_id: &'a str,
    item: &'a BufferedItem,
    #[serde(with = "time::serde::rfc3339")]
    sent_at: OffsetDateTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SmsEnvelope<'a> {
    message_id: &'a str,
    device_id: &'a str,
    from: &'a str,
    to: &'a str,
    provider: crate::network::Provider,
    text: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    sent_at: OffsetDateTime,
}

pub fn item_topic(prefix: &str, device_id: &str) -> String {
    format!("{prefix}/sync/{device_id}/item@v1")
}

pub fn sms_topic(prefix: &str) -> String {
    format!("{prefix}/sms/outbound@v1")
}

#[derive(Clone)]
pub struct MqttUpstream {
    client: AsyncClient,
    prefix: String,
    health: HealthTracker,
}

impl MqttUpstream {
    /// Creates the client and spawns its event loop, reporting connection
    /// state to `health`.
    pub fn connect(conf: &MqttConf, health: HealthTracker) -> Self {
        let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        tracing::info!(host = %conf.host, port = conf.port, "mqtt upstream configured");

        let events = health.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        tracing::info!("mqtt upstream connected");
                        events.mark_mqtt_connected();
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => events.mark_mqtt_disconnected(),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "mqtt upstream error, reconnecting");
                        events.increment_reconnects();
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self { client, prefix: conf.topic_prefix.clone(), health }
    }

    fn connected(&self) -> bool {
        self.health.is_mqtt_connected()
    }
}

#[async_trait]
impl SyncTarget for MqttUpstream {
    async fn push(&self, device_id: &str, item: &BufferedItem) -> Result<(), SyncFailure> {
        if !self.connected() {
            return Err(SyncFailure::Transport("mqtt broker not connected".into()));
        }
        let envelope = ItemEnvelope { device_id, item, sent_at: OffsetDateTime::now_utc() };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| SyncFailure::Rejected(e.to_string()))?;
        self.client
            .publish(item_topic(&self.prefix, device_id), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SyncFailure::Transport(e.to_string()))
    }
}

#[async_trait]
impl SmsGateway for MqttUpstream {
    async fn send(&self, sms: &OutboundSms) -> Result<(), GatewayError> {
        if !self.connected() {
            return Err(GatewayError("mqtt broker not connected".into()));
        }
        let envelope = SmsEnvelope {
            message_id: &sms.message_id,
            device_id: &sms.device_id,
            from: &sms.from,
            to: &sms.to,
            provider: sms.provider,
            text: &sms.text,
            sent_at: OffsetDateTime::now_utc(),
        };
        let payload = serde_json::to_vec(&envelope).map_err(|e| GatewayError(e.to_string()))?;
        self.client
            .publish(sms_topic(&self.prefix), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| GatewayError(e.to_string()))
    }
}
