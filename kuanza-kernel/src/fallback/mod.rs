/**
 * SMS / USSD FALLBACK - Proof of delivery without a data connection
 *
 * ROLE :
 * When the buffer + network path is unusable a driver can still confirm a
 * delivery over SMS (sent through the upstream gateway) or by walking the
 * USSD menu from a basic handset.
 *
 * CREDITS :
 * Each SMS costs one credit taken from the device's resilience record. The
 * decrement is written to the device override; a failed send refunds it.
 */

pub mod ussd;

use crate::error::{ResilienceError, Result};
use crate::network::Provider;
use crate::resilience::ResilienceStore;
use crate::store::SharedRepository;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use ussd::{Reply, UssdMenu};

pub const SMS_COST: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsCommands {
    pub pod_confirm: String,
    pub delivery_status: String,
    pub location_update: String,
    pub emergency: String,
}

impl SmsCommands {
    /// Short codes `*NNN*k#` sharing one random three-digit prefix.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let prefix: u16 = rng.gen_range(100..1000);
        Self {
            pod_confirm: format!("*{prefix}*1#"),
            delivery_status: format!("*{prefix}*2#"),
            location_update: format!("*{prefix}*3#"),
            emergency: format!("*{prefix}*9#"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsFallbackConfig {
    pub device_id: String,
    pub phone_number: String,
    pub provider: Provider,
    pub enabled: bool,
    pub commands: SmsCommands,
    #[serde(with = "time::serde::rfc3339")]
    pub configured_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub message_id: String,
    pub device_id: String,
    pub from: String,
    pub to: String,
    pub provider: Provider,
    pub text: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("sms gateway error: {0}")]
pub struct GatewayError(pub String);

/// Carrier-side SMS delivery.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, sms: &OutboundSms) -> std::result::Result<(), GatewayError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsReceipt {
    pub success: bool,
    pub message_id: String,
    pub credits_used: u32,
    pub remaining_credits: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdResponse {
    pub success: bool,
    pub response: String,
    pub next_menu: UssdMenu,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ResilienceError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct SmsFallback {
    configs: SharedRepository<SmsFallbackConfig>,
    resilience: ResilienceStore,
    gateway: Arc<dyn SmsGateway>,
}

impl SmsFallback {
    pub fn new(
        configs: SharedRepository<SmsFallbackConfig>,
        resilience: ResilienceStore,
        gateway: Arc<dyn SmsGateway>,
    ) -> Self {
        Self { configs, resilience, gateway }
    }

    pub fn configure_sms(
        &self,
        device_id: &str,
        phone_number: &str,
        provider: Provider,
    ) -> Result<SmsFallbackConfig> {
        require("deviceId", device_id)?;
        require("phoneNumber", phone_number)?;
        let config = SmsFallbackConfig {
            device_id: device_id.to_string(),
            phone_number: phone_number.trim().to_string(),
            provider,
            enabled: true,
            commands: SmsCommands::generate(&mut rand::thread_rng()),
            configured_at: OffsetDateTime::now_utc(),
        };
        self.configs.put(device_id, config.clone())?;
        tracing::info!(device_id, ?provider, "sms fallback configured");
        Ok(config)
    }

    pub fn config(&self, device_id: &str, channel: &'static str) -> Result<SmsFallbackConfig> {
        self.configs
            .get(device_id)?
            .filter(|c| c.enabled)
            .ok_or_else(|| ResilienceError::NotConfigured {
                device_id: device_id.to_string(),
                channel,
            })
    }

    pub async fn send_sms_pod(
        &self,
        device_id: &str,
        tracking_number: &str,
        delivery_status: &str,
        recipient_phone: &str,
    ) -> Result<SmsReceipt> {
        require("trackingNumber", tracking_number)?;
        require("deliveryStatus", delivery_status)?;
        require("recipientPhone", recipient_phone)?;
        let config = self.config(device_id, "sms")?;

        let remaining = self.resilience.consume_sms_credit(device_id)?;
        let sms = OutboundSms {
            message_id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            from: config.phone_number.clone(),
            to: recipient_phone.trim().to_string(),
            provider: config.provider,
            text: format!("POD {tracking_number}: {delivery_status}"),
        };

        if let Err(e) = self.gateway.send(&sms).await {
            let refunded = self.resilience.refund_sms_credit(device_id);
            tracing::error!(
                device_id,
                message_id = %sms.message_id,
                error = %e,
                refunded = refunded.is_ok(),
                "sms pod send failed"
            );
            return Ok(SmsReceipt {
                success: false,
                message_id: sms.message_id,
                credits_used: 0,
                remaining_credits: refunded.unwrap_or(remaining),
            });
        }

        tracing::info!(device_id, message_id = %sms.message_id, remaining, "sms pod sent");
        Ok(SmsReceipt {
            success: true,
            message_id: sms.message_id,
            credits_used: SMS_COST,
            remaining_credits: remaining,
        })
    }

    pub fn process_ussd_pod(
        &self,
        session_id: &str,
        command: &str,
        tracking_number: &str,
        device_id: &str,
    ) -> Result<UssdResponse> {
        require("trackingNumber", tracking_number)?;
        self.config(device_id, "ussd")?;
        let turn = ussd::walk(command);
        tracing::info!(device_id, session_id, command, next = ?turn.next, "ussd turn");
        Ok(UssdResponse {
            success: turn.reply != Reply::InvalidOption,
            response: ussd::render(turn.reply, tracking_number),
            next_menu: turn.next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ResilienceConfig, ResilienceConfigPatch};
    use crate::store::MemoryRepository;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<OutboundSms>>,
        fail: bool,
    }

    #[async_trait]
    impl SmsGateway for Outbox {
        async fn send(&self, sms: &OutboundSms) -> std::result::Result<(), GatewayError> {
            if self.fail {
                return Err(GatewayError("carrier down".into()));
            }
            self.sent.lock().push(sms.clone());
            Ok(())
        }
    }

    fn fallback(gateway: Arc<Outbox>) -> SmsFallback {
        SmsFallback::new(
            Arc::new(MemoryRepository::new("sms")),
            ResilienceStore::new(ResilienceConfig::default(), Arc::new(MemoryRepository::new("r"))),
            gateway,
        )
    }

    #[test]
    fn command_codes_share_a_prefix() {
        let codes = SmsCommands::generate(&mut StdRng::seed_from_u64(7));
        let prefix = &codes.pod_confirm[..5];
        assert!(codes.pod_confirm.ends_with("*1#"));
        assert!(codes.emergency.starts_with(prefix));
        assert_eq!(codes.delivery_status.len(), "*123*2#".len());
    }

    #[tokio::test]
    async fn sms_requires_configuration() {
        let f = fallback(Arc::new(Outbox::default()));
        let err = f.send_sms_pod("dev-1", "TRK-1", "delivered", "+244923000000").await.unwrap_err();
        assert!(matches!(err, ResilienceError::NotConfigured { channel: "sms", .. }));
    }

    #[tokio::test]
    async fn sms_pod_spends_one_persisted_credit() {
        let outbox = Arc::new(Outbox::default());
        let f = fallback(outbox.clone());
        f.configure_sms("dev-1", "+244923111111", Provider::Unitel).unwrap();

        let first = f.send_sms_pod("dev-1", "TRK-1", "delivered", "+244923000000").await.unwrap();
        let second = f.send_sms_pod("dev-1", "TRK-2", "delivered", "+244923000000").await.unwrap();
        assert!(first.success);
        assert_eq!((first.credits_used, first.remaining_credits), (1, 99));
        assert_eq!(second.remaining_credits, 98);
        assert_eq!(f.resilience.get("dev-1").unwrap().sms_credits, 98);
        assert_eq!(f.resilience.defaults().sms_credits, 100);

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "POD TRK-1: delivered");
        assert_eq!(sent[0].from, "+244923111111");
        assert_eq!(sent[0].to, "+244923000000");
    }

    #[tokio::test]
    async fn no_credits_no_send() {
        let outbox = Arc::new(Outbox::default());
        let f = fallback(outbox.clone());
        f.configure_sms("dev-1", "+244923111111", Provider::Africell).unwrap();
        f.resilience
            .update("dev-1", &ResilienceConfigPatch { sms_credits: Some(0), ..Default::default() })
            .unwrap();
        let err = f.send_sms_pod("dev-1", "TRK-1", "delivered", "+244923000000").await.unwrap_err();
        assert!(matches!(err, ResilienceError::InsufficientCredits { .. }));
        assert!(outbox.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_refunds_the_credit() {
        let f = fallback(Arc::new(Outbox { fail: true, ..Default::default() }));
        f.configure_sms("dev-1", "+244923111111", Provider::Movicel).unwrap();
        let receipt = f.send_sms_pod("dev-1", "TRK-1", "failed", "+244923000000").await.unwrap();
        assert!(!receipt.success);
        assert_eq!((receipt.credits_used, receipt.remaining_credits), (0, 100));
    }

    #[test]
    fn ussd_turns_require_configuration_and_walk_the_menu() {
        let f = fallback(Arc::new(Outbox::default()));
        assert!(matches!(
            f.process_ussd_pod("s-1", "1", "TRK-9", "dev-1"),
            Err(ResilienceError::NotConfigured { channel: "ussd", .. })
        ));
        f.configure_sms("dev-1", "+244923111111", Provider::Unitel).unwrap();

        let r = f.process_ussd_pod("s-1", "1", "TRK-9", "dev-1").unwrap();
        assert_eq!(r.next_menu, UssdMenu::ConfirmDelivery);
        let r = f.process_ussd_pod("s-1", "11", "TRK-9", "dev-1").unwrap();
        assert!(r.success);
        assert!(r.response.contains("TRK-9 confirmed"));
        let r = f.process_ussd_pod("s-1", "2", "TRK-9", "dev-1").unwrap();
        assert_eq!(r.next_menu, UssdMenu::ReportIssue);
        let r = f.process_ussd_pod("s-1", "7", "TRK-9", "dev-1").unwrap();
        assert!(!r.success);
        assert_eq!(r.next_menu, UssdMenu::MainMenu);
    }
}
