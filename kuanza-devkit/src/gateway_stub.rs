use async_trait::async_trait;
use kuanza_kernel::fallback::{GatewayError, OutboundSms, SmsGateway};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps every SMS handed to it; can be switched to fail like a carrier outage.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutboundSms>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundSms> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SmsGateway for RecordingGateway {
    async fn send(&self, sms: &OutboundSms) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError("carrier unavailable".into()));
        }
        self.sent.lock().push(sms.clone());
        Ok(())
    }
}
