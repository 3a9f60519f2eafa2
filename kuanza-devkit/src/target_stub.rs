/*!
Scripted sync target

Stands in for the MQTT upstream: every push is recorded, then answered
according to the current `Script`.
*/

use async_trait::async_trait;
use kuanza_kernel::buffer::{BufferType, BufferedItem};
use kuanza_kernel::sync::{SyncFailure, SyncTarget};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    AcceptAll,
    RejectAll,
    /// Rejects items whose payload has `"fail": true`.
    RejectFlagged,
    /// Sleeps before accepting (used to trip the item timeout).
    Stall(Duration),
    /// Parks every push until `release` is called.
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Push {
    pub device_id: String,
    pub item_id: String,
    pub item_type: BufferType,
    pub priority: i64,
}

pub struct ScriptedTarget {
    script: Mutex<Script>,
    pushes: Mutex<Vec<Push>>,
    entered: Notify,
    released: Notify,
}

impl ScriptedTarget {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            pushes: Mutex::new(Vec::new()),
            entered: Notify::new(),
            released: Notify::new(),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().clone()
    }

    pub fn pushed_ids(&self) -> Vec<String> {
        self.pushes.lock().iter().map(|p| p.item_id.clone()).collect()
    }

    /// Resolves once a push is parked under `Script::Hold`.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl SyncTarget for ScriptedTarget {
    async fn push(&self, device_id: &str, item: &BufferedItem) -> Result<(), SyncFailure> {
        self.pushes.lock().push(Push {
            device_id: device_id.to_string(),
            item_id: item.id.clone(),
            item_type: item.item_type,
            priority: item.sync_priority,
        });
        let script = *self.script.lock();
        match script {
            Script::AcceptAll => Ok(()),
            Script::RejectAll => Err(SyncFailure::Rejected("scripted rejection".into())),
            Script::RejectFlagged => {
                if item.payload["fail"] == serde_json::Value::Bool(true) {
                    Err(SyncFailure::Rejected("flagged payload".into()))
                } else {
                    Ok(())
                }
            }
            Script::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Script::Hold => {
                self.entered.notify_one();
                self.released.notified().await;
                Ok(())
            }
        }
    }
}
