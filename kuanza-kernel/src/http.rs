/**
 * KUANZA REST API - HTTP surface of the resilience kernel
 *
 * ROLE :
 * Field apps report network / power state, buffer operations, trigger
 * drains and fall back to SMS / USSD through these routes.
 *
 * HOW IT WORKS :
 * - axum router nested under the configured base path (default /api/angola)
 * - every success body is `{message, ...payload}`
 * - every failure body is `{message, error}` with a status derived from
 *   `ResilienceError` (400 / 404 / 402 / 412 / 503 / 500)
 * - JSON bodies go through `Payload`, so malformed input is a 400 in the
 *   same shape instead of axum's plain-text rejection
 *
 * SECURITY :
 * When KUANZA_API_KEY is set, every route except the health checks needs
 * a matching `x-api-key` header.
 */

use crate::buffer::{BufferQueue, BufferType};
use crate::config::KernelConfig;
use crate::error::ResilienceError;
use crate::failures::FailureRecorder;
use crate::fallback::{SmsFallback, SmsGateway};
use crate::health::{HealthTracker, KernelHealth};
use crate::maps::MapCatalogue;
use crate::network::{NetworkStatusPatch, NetworkTracker, Provider};
use crate::resilience::{ResilienceConfigPatch, ResilienceStore};
use crate::store::Stores;
use crate::sync::{AbandonHook, DeadLetter, LogAbandoned, SyncProcessor, SyncTarget};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub network: NetworkTracker,
    pub resilience: ResilienceStore,
    pub buffer: BufferQueue,
    pub sync: SyncProcessor,
    pub failures: FailureRecorder,
    pub fallback: SmsFallback,
    pub maps: MapCatalogue,
    pub health: HealthTracker,
    pub stores: Stores,
}

impl AppState {
    pub fn new(
        config: &KernelConfig,
        stores: Stores,
        target: Arc<dyn SyncTarget>,
        gateway: Arc<dyn SmsGateway>,
        health: HealthTracker,
    ) -> Self {
        let resilience =
            ResilienceStore::new(config.resilience_defaults.clone(), stores.resilience.clone());
        let network = NetworkTracker::new(stores.network.clone());
        let buffer =
            BufferQueue::new(stores.buffers.clone(), stores.trackers.clone(), resilience.clone());
        let hook: Arc<dyn AbandonHook> = if config.sync.dead_letter {
            Arc::new(DeadLetter::new(stores.abandoned.clone()))
        } else {
            Arc::new(LogAbandoned)
        };
        let sync = SyncProcessor::new(
            buffer.clone(),
            network.clone(),
            target,
            hook,
            stores.abandoned.clone(),
            config.sync.settings(),
        );
        let failures = FailureRecorder::new(
            stores.network_failures.clone(),
            stores.power_failures.clone(),
            resilience.clone(),
        );
        let fallback = SmsFallback::new(stores.sms.clone(), resilience.clone(), gateway);
        let maps = MapCatalogue::new(
            config.offline_maps.clone(),
            stores.map_downloads.clone(),
            network.clone(),
        );
        Self { network, resilience, buffer, sync, failures, fallback, maps, health, stores }
    }
}

/// `Json` whose rejection is a `ResilienceError::Validation`.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ResilienceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ResilienceError::Validation(e.body_text()))?;
        Ok(Self(value))
    }
}

type ApiResult = Result<Json<Value>, ResilienceError>;

/// `{message, ...payload}`; non-object payloads land under `data`.
fn reply<T: Serialize>(message: &str, payload: T) -> Json<Value> {
    let mut body = match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        Ok(other) => Map::from_iter([("data".to_string(), other)]),
        Err(e) => {
            tracing::error!(error = %e, "response serialisation failed");
            Map::new()
        }
    };
    body.insert("message".to_string(), Value::String(message.to_string()));
    Json(Value::Object(body))
}

fn logged<'a>(
    op: &'static str,
    device_id: &'a str,
) -> impl FnOnce(ResilienceError) -> ResilienceError + 'a {
    move |e| {
        let expected = matches!(e, ResilienceError::NetworkUnavailable { .. });
        if e.status_code().is_server_error() && !expected {
            tracing::error!(op, device_id, error = %e, "request failed");
        } else {
            tracing::warn!(op, device_id, error = %e, "request rejected");
        }
        e
    }
}

/// Health checks stay reachable without a key.
fn is_open_path(path: &str) -> bool {
    matches!(path, "/health" | "/system/health")
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if is_open_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }
    let expected = std::env::var("KUANZA_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        return Ok(next.run(req).await);
    }
    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        tracing::warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState, base_path: &str) -> Router {
    let api = Router::new()
        .route("/network-failure", post(record_network_failure))
        .route("/network-failure/{device_id}", get(list_network_failures))
        .route("/power-failure", post(record_power_failure))
        .route("/power-failure/{device_id}", get(list_power_failures))
        .route("/offline-maps", get(list_offline_maps))
        .route("/offline-maps/download", post(download_offline_map))
        .route("/sms/configure", post(configure_sms))
        .route("/sms/pod", post(send_sms_pod))
        .route("/ussd/pod", post(process_ussd_pod))
        .route("/sync/buffer", post(buffer_item))
        .route("/sync/status/{device_id}", get(sync_status))
        .route("/sync/process", post(process_sync))
        .route("/sync/abandoned/{device_id}", get(abandoned_items))
        .route("/network/status/{device_id}", get(network_status))
        .route("/network/status", post(update_network_status))
        .route("/resilience/config/{device_id}", get(resilience_config))
        .route("/resilience/config", post(update_resilience_config))
        .with_state(app_state.clone());

    let root = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(system_health))
        .with_state(app_state);

    let base = base_path.trim_matches('/');
    let router = if base.is_empty() {
        root.merge(api)
    } else {
        root.nest(&format!("/{base}"), api)
    };
    router.layer(middleware::from_fn(require_api_key))
}

// GET /system/health
async fn system_health(State(app): State<AppState>) -> Result<Json<KernelHealth>, ResilienceError> {
    let mut devices: HashSet<String> = app.stores.network.keys()?.into_iter().collect();
    devices.extend(app.buffer.devices()?);
    let pending = app.buffer.total_pending()?;
    Ok(Json(app.health.get_health(devices.len(), pending, app.stores.info())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkFailureRequest {
    device_id: String,
    duration: u64,
    #[serde(default)]
    affected_operations: Vec<String>,
}

// POST /network-failure
async fn record_network_failure(
    State(app): State<AppState>,
    Payload(req): Payload<NetworkFailureRequest>,
) -> ApiResult {
    let event = app
        .failures
        .record_network_failure(&req.device_id, req.duration, req.affected_operations)
        .map_err(logged("network_failure.record", &req.device_id))?;
    Ok(reply("Network failure recorded", serde_json::json!({ "event": event })))
}

// GET /network-failure/{device_id}
async fn list_network_failures(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let events = app
        .failures
        .network_failures(&device_id)
        .map_err(logged("network_failure.list", &device_id))?;
    Ok(reply("Network failures", serde_json::json!({ "events": events })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerFailureRequest {
    device_id: String,
    battery_level: u8,
    #[serde(default)]
    critical_operations: Vec<String>,
}

// POST /power-failure
async fn record_power_failure(
    State(app): State<AppState>,
    Payload(req): Payload<PowerFailureRequest>,
) -> ApiResult {
    let event = app
        .failures
        .record_power_failure(&req.device_id, req.battery_level, req.critical_operations)
        .map_err(logged("power_failure.record", &req.device_id))?;
    Ok(reply("Power failure recorded", serde_json::json!({ "event": event })))
}

// GET /power-failure/{device_id}
async fn list_power_failures(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let events = app
        .failures
        .power_failures(&device_id)
        .map_err(logged("power_failure.list", &device_id))?;
    Ok(reply("Power failures", serde_json::json!({ "events": events })))
}

// GET /offline-maps
async fn list_offline_maps(State(app): State<AppState>) -> Json<Value> {
    reply("Offline map packages", serde_json::json!({ "packages": app.maps.list() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapDownloadRequest {
    device_id: String,
    package_id: String,
}

// POST /offline-maps/download
async fn download_offline_map(
    State(app): State<AppState>,
    Payload(req): Payload<MapDownloadRequest>,
) -> ApiResult {
    let (package, download) = app
        .maps
        .request_download(&req.device_id, &req.package_id)
        .map_err(logged("offline_maps.download", &req.device_id))?;
    let body = serde_json::json!({ "package": package, "download": download });
    Ok(reply("Map download queued", body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmsConfigureRequest {
    device_id: String,
    phone_number: String,
    provider: Provider,
}

// POST /sms/configure
async fn configure_sms(
    State(app): State<AppState>,
    Payload(req): Payload<SmsConfigureRequest>,
) -> ApiResult {
    let config = app
        .fallback
        .configure_sms(&req.device_id, &req.phone_number, req.provider)
        .map_err(logged("sms.configure", &req.device_id))?;
    Ok(reply("SMS fallback configured", serde_json::json!({ "config": config })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmsPodRequest {
    device_id: String,
    tracking_number: String,
    delivery_status: String,
    recipient_phone: String,
}

// POST /sms/pod
async fn send_sms_pod(
    State(app): State<AppState>,
    Payload(req): Payload<SmsPodRequest>,
) -> ApiResult {
    let receipt = app
        .fallback
        .send_sms_pod(
            &req.device_id,
            &req.tracking_number,
            &req.delivery_status,
            &req.recipient_phone,
        )
        .await
        .map_err(logged("sms.pod", &req.device_id))?;
    let message = if receipt.success {
        "SMS proof of delivery sent"
    } else {
        "SMS proof of delivery not sent"
    };
    Ok(reply(message, receipt))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UssdPodRequest {
    session_id: String,
    #[serde(default)]
    command: String,
    tracking_number: String,
    device_id: String,
}

// POST /ussd/pod
async fn process_ussd_pod(
    State(app): State<AppState>,
    Payload(req): Payload<UssdPodRequest>,
) -> ApiResult {
    let turn = app
        .fallback
        .process_ussd_pod(&req.session_id, &req.command, &req.tracking_number, &req.device_id)
        .map_err(logged("ussd.pod", &req.device_id))?;
    Ok(reply("USSD processed", turn))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BufferRequest {
    device_id: String,
    #[serde(rename = "type")]
    item_type: BufferType,
    #[serde(default)]
    payload: Value,
    priority: Option<i64>,
}

// POST /sync/buffer
async fn buffer_item(
    State(app): State<AppState>,
    Payload(req): Payload<BufferRequest>,
) -> ApiResult {
    let enqueued = app
        .buffer
        .enqueue(&req.device_id, req.item_type, req.payload, req.priority)
        .map_err(logged("sync.buffer", &req.device_id))?;
    Ok(reply("Item buffered for sync", enqueued))
}

// GET /sync/status/{device_id}
async fn sync_status(State(app): State<AppState>, Path(device_id): Path<String>) -> ApiResult {
    let stats = app.buffer.stats(&device_id).map_err(logged("sync.status", &device_id))?;
    let status = app.network.get_status(&device_id).map_err(logged("sync.status", &device_id))?;
    Ok(reply("Sync status", serde_json::json!({ "syncStats": stats, "networkStatus": status })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncProcessRequest {
    device_id: String,
    #[serde(default)]
    force: bool,
}

// POST /sync/process
async fn process_sync(
    State(app): State<AppState>,
    Payload(req): Payload<SyncProcessRequest>,
) -> ApiResult {
    let report = app
        .sync
        .process_sync(&req.device_id, req.force)
        .await
        .map_err(logged("sync.process", &req.device_id))?;
    Ok(reply("Sync processed", report))
}

// GET /sync/abandoned/{device_id}
async fn abandoned_items(State(app): State<AppState>, Path(device_id): Path<String>) -> ApiResult {
    let items = app.sync.abandoned(&device_id).map_err(logged("sync.abandoned", &device_id))?;
    Ok(reply("Abandoned items", serde_json::json!({ "items": items })))
}

// GET /network/status/{device_id}
async fn network_status(State(app): State<AppState>, Path(device_id): Path<String>) -> ApiResult {
    let status = app.network.get_status(&device_id).map_err(logged("network.status", &device_id))?;
    Ok(reply("Network status", serde_json::json!({ "networkStatus": status })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkStatusRequest {
    device_id: String,
    #[serde(flatten)]
    patch: NetworkStatusPatch,
}

// POST /network/status
async fn update_network_status(
    State(app): State<AppState>,
    Payload(req): Payload<NetworkStatusRequest>,
) -> ApiResult {
    let update = app
        .network
        .update_status(&req.device_id, &req.patch)
        .map_err(logged("network.update", &req.device_id))?;
    Ok(reply(
        "Network status updated",
        serde_json::json!({
            "networkStatus": update.status,
            "recommendations": update.recommendations,
        }),
    ))
}

// GET /resilience/config/{device_id}
async fn resilience_config(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let config = app.resilience.get(&device_id).map_err(logged("resilience.get", &device_id))?;
    Ok(reply("Resilience config", serde_json::json!({ "config": config })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResilienceConfigRequest {
    device_id: String,
    #[serde(default)]
    config: ResilienceConfigPatch,
}

// POST /resilience/config
async fn update_resilience_config(
    State(app): State<AppState>,
    Payload(req): Payload<ResilienceConfigRequest>,
) -> ApiResult {
    let config = app
        .resilience
        .update(&req.device_id, &req.config)
        .map_err(logged("resilience.update", &req.device_id))?;
    Ok(reply("Resilience config updated", serde_json::json!({ "config": config })))
}
