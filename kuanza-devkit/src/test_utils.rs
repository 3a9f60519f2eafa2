/*!
Test harness for the resilience kernel

Builds the same `AppState` as the binary, on in-memory stores (or a JSON
directory) with scripted collaborators in place of MQTT.
*/

use crate::gateway_stub::RecordingGateway;
use crate::target_stub::{Script, ScriptedTarget};
use anyhow::{Context, Result};
use kuanza_kernel::config::KernelConfig;
use kuanza_kernel::health::HealthTracker;
use kuanza_kernel::http::{build_router, AppState};
use kuanza_kernel::network::NetworkStatusPatch;
use kuanza_kernel::store::Stores;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Defaults with a short item timeout, no API key concerns.
pub fn test_config() -> KernelConfig {
    let mut cfg = KernelConfig::default();
    cfg.sync.item_timeout_ms = 200;
    cfg
}

pub struct TestHarness {
    pub app: AppState,
    pub target: Arc<ScriptedTarget>,
    pub gateway: Arc<RecordingGateway>,
    pub config: KernelConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self::build(config, Stores::in_memory())
    }

    /// Same wiring on JSON file stores under `dir`.
    pub fn on_disk(config: KernelConfig, dir: &Path) -> Result<Self> {
        let stores = Stores::json_dir(dir).context("failed to open json stores")?;
        Ok(Self::build(config, stores))
    }

    fn build(config: KernelConfig, stores: Stores) -> Self {
        // try_init: several harnesses share one test binary
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let target = Arc::new(ScriptedTarget::new(Script::AcceptAll));
        let gateway = Arc::new(RecordingGateway::new());
        let app =
            AppState::new(&config, stores, target.clone(), gateway.clone(), HealthTracker::new());
        Self { app, target, gateway, config }
    }

    pub fn set_online(&self, device_id: &str) -> Result<()> {
        let patch = NetworkStatusPatch {
            is_online: Some(true),
            signal_strength: Some(80),
            ..Default::default()
        };
        self.app.network.update_status(device_id, &patch)?;
        Ok(())
    }

    /// Serves the router on an ephemeral local port.
    pub async fn spawn_server(&self) -> Result<TestServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("failed to bind test port")?;
        let addr = listener.local_addr()?;
        let router = build_router(self.app.clone(), &self.config.http.base_path);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "test server stopped");
            }
        });
        tracing::info!(%addr, "test server listening");
        Ok(TestServer {
            root_url: format!("http://{addr}"),
            api_url: format!("http://{addr}{}", self.config.http.base_path.trim_end_matches('/')),
            handle,
        })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestServer {
    pub root_url: String,
    pub api_url: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
