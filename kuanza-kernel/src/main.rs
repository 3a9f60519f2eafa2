/**
 * KUANZA KERNEL - Entry point of the offline resilience server
 *
 * ROLE : wires config, stores, the MQTT upstream, the auto-sync worker and
 * the HTTP API together.
 */

use anyhow::{Context, Result};
use kuanza_kernel::config::load_config;
use kuanza_kernel::health::HealthTracker;
use kuanza_kernel::http::{build_router, AppState};
use kuanza_kernel::store::Stores;
use kuanza_kernel::upstream::MqttUpstream;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kuanza_kernel=info")),
        )
        .init();

    let cfg = load_config().await;

    let stores = Stores::open(cfg.storage.data_dir.as_deref()).context("failed to open stores")?;
    for info in stores.info() {
        tracing::info!(
            store = %info.name,
            backend = %info.backend,
            records = info.records,
            "store ready"
        );
    }

    let health = HealthTracker::new();
    let upstream = Arc::new(MqttUpstream::connect(&cfg.mqtt, health.clone()));

    let app_state = AppState::new(&cfg, stores, upstream.clone(), upstream, health);

    if cfg.sync.auto_interval_secs > 0 {
        app_state.sync.clone().spawn_auto_sync();
    } else {
        tracing::info!("auto-sync worker disabled");
    }

    let app = build_router(app_state, &cfg.http.base_path);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    tracing::info!(addr = %cfg.http.bind, base_path = %cfg.http.base_path, "kernel listening");
    axum::serve(listener, app).await.context("http server failed")?;
    Ok(())
}
