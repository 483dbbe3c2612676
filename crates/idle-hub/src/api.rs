//! HTTP API: device state ingress and automation management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use idle_tracker::{CreateAutomationRequest, IdleEngine, TrackerError, UpdateAutomationRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use virtual_devices::{DeviceError, DeviceKind, VirtualDevice, VirtualDevices};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<IdleEngine<VirtualDevices>>,
    pub devices: VirtualDevices,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn tracker_error(e: &TrackerError) -> ApiResult {
    let status = match e {
        TrackerError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

fn device_error(e: &DeviceError) -> ApiResult {
    let status = match e {
        DeviceError::NotFound(_) => StatusCode::NOT_FOUND,
        DeviceError::AlreadyExists(_) => StatusCode::CONFLICT,
        DeviceError::Invalid(_) => StatusCode::BAD_REQUEST,
        DeviceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

/// Register device request
#[derive(Deserialize)]
struct AddDeviceRequest {
    id: String,
    #[serde(default)]
    name: Option<String>,
    kind: DeviceKind,
    #[serde(default)]
    state: Option<String>,
}

/// State report from a device
#[derive(Deserialize)]
struct StateReport {
    value: String,
}

#[derive(Deserialize)]
struct AvailabilityRequest {
    available: bool,
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.devices.list())
}

async fn add_device(
    State(state): State<AppState>,
    Json(req): Json<AddDeviceRequest>,
) -> impl IntoResponse {
    let mut device = VirtualDevice::new(req.id, req.kind);
    device.name = req.name;
    device.state = req.state;

    match state.devices.add(device).await {
        Ok(device) => (StatusCode::CREATED, Json(ApiResponse::success(device))),
        Err(e) => device_error(&e),
    }
}

async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.devices.get(&id) {
        Some(device) => ok(device),
        None => device_error(&DeviceError::NotFound(id)),
    }
}

async fn remove_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.devices.remove(&id).await {
        Ok(device) => ok(device),
        Err(e) => device_error(&e),
    }
}

/// Device reports a new state; this is what drives the automations
async fn report_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StateReport>,
) -> impl IntoResponse {
    match state.devices.report(&id, &req.value) {
        Ok(event) => ok(event),
        Err(e) => device_error(&e),
    }
}

async fn set_availability(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AvailabilityRequest>,
) -> impl IntoResponse {
    match state.devices.set_available(&id, req.available) {
        Ok(()) => ok(serde_json::json!({ "id": id, "available": req.available })),
        Err(e) => device_error(&e),
    }
}

async fn list_automations(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.engine.list())
}

async fn install_automation(
    State(state): State<AppState>,
    Json(req): Json<CreateAutomationRequest>,
) -> impl IntoResponse {
    match state.engine.install(req).await {
        Ok(automation) => (StatusCode::CREATED, Json(ApiResponse::success(automation))),
        Err(e) => tracker_error(&e),
    }
}

async fn get_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.get(&id) {
        Some(automation) => ok(automation),
        None => tracker_error(&TrackerError::NotFound(id)),
    }
}

async fn update_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAutomationRequest>,
) -> impl IntoResponse {
    match state.engine.update(&id, req).await {
        Ok(automation) => ok(automation),
        Err(e) => tracker_error(&e),
    }
}

async fn uninstall_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.uninstall(&id).await {
        Ok(automation) => ok(automation),
        Err(e) => tracker_error(&e),
    }
}

async fn automation_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.status(&id).await {
        Ok(Some(status)) => ok(status),
        Ok(None) => ok(serde_json::json!({ "running": false })),
        Err(e) => tracker_error(&e),
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/devices", get(list_devices).post(add_device))
        .route("/api/v1/devices/:id", get(get_device).delete(remove_device))
        .route("/api/v1/devices/:id/state", post(report_state))
        .route("/api/v1/devices/:id/availability", post(set_availability))
        .route(
            "/api/v1/automations",
            get(list_automations).post(install_automation),
        )
        .route(
            "/api/v1/automations/:id",
            get(get_automation)
                .put(update_automation)
                .delete(uninstall_automation),
        )
        .route("/api/v1/automations/:id/status", get(automation_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
