//! HTTP/WebSocket Server (C14): the thin `axum` binding layer over the Command Gateway,
//! Commissioning Orchestrator and Device Registry. Routing and JSON binding are out of scope per
//! spec.md §1 -- this module exists only because a complete, runnable binary needs a real HTTP
//! crate rather than hand-rolled TCP parsing, and `axum` is the crate the example pack reaches
//! for whenever an HTTP surface is needed. Component errors are converted to the 400/404/500
//! mapping here and nowhere else.

use crate::commissioning::CommissioningOrchestrator;
use crate::datamodel::DataModelDictionary;
use crate::gateway::{CommandGateway, CommandRequest};
use crate::mqtt::MqttController;
use crate::notify::Broadcaster;
use crate::polling::PollingEngine;
use crate::registry::Registry;
use crate::types::{Device, EndpointId, NodeId};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub gateway: Arc<CommandGateway>,
    pub commissioning: Arc<CommissioningOrchestrator>,
    pub dict: Arc<dyn DataModelDictionary>,
    pub broadcaster: Broadcaster,
    pub mqtt: Arc<MqttController>,
    pub polling: Arc<PollingEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/device", get(list_devices).post(commission))
        .route("/device/:node/:endpoint", delete(delete_device))
        .route("/device/:node/:endpoint/name", post(rename_device))
        .route("/device/:node/:endpoint/:cluster/:attribute", post(write_attribute))
        .route("/command", post(execute_command))
        .route("/datamodel/cluster", get(list_clusters))
        .route("/datamodel/devicetype", get(list_device_types))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> AxumResponse {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

async fn health(State(state): State<AppState>) -> AxumResponse {
    match state.registry.get_all_devices().await {
        Ok(devices) => Json(serde_json::json!({
            "status": "healthy",
            "devices": devices.len(),
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct DeviceFilter {
    node: Option<u64>,
    endpoint: Option<u16>,
    device_type: Option<u32>,
    name: Option<String>,
    cluster: Option<String>,
    attribute: Option<String>,
}

#[derive(serde::Serialize)]
struct DeviceView {
    node: NodeId,
    endpoint: EndpointId,
    device_type: u32,
    name: String,
    topic_id: String,
    attributes: Vec<crate::types::Attribute>,
}

async fn list_devices(State(state): State<AppState>, Query(filter): Query<DeviceFilter>) -> AxumResponse {
    let devices = match state.registry.get_all_devices().await {
        Ok(devices) => devices,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut views = Vec::new();
    for device in devices {
        if let Some(node) = filter.node {
            if device.node_id.0 != node {
                continue;
            }
        }
        if let Some(endpoint) = filter.endpoint {
            if device.endpoint.0 != endpoint {
                continue;
            }
        }
        if let Some(device_type) = filter.device_type {
            if device.device_type != device_type {
                continue;
            }
        }
        let name = device.name.clone().unwrap_or_else(|| format!("{} {}", device.vendor_name, device.product_name));
        if let Some(want) = &filter.name {
            if !name.contains(want.as_str()) {
                continue;
            }
        }
        let mut attributes = match state.registry.get_attributes_for_device(device.node_id, device.endpoint).await {
            Ok(attrs) => attrs,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        if let Some(cluster) = &filter.cluster {
            attributes.retain(|a| a.cluster.eq_ignore_ascii_case(cluster));
        }
        if let Some(attribute) = &filter.attribute {
            attributes.retain(|a| a.attribute.eq_ignore_ascii_case(attribute));
        }
        if (filter.cluster.is_some() || filter.attribute.is_some()) && attributes.is_empty() {
            continue;
        }
        views.push(DeviceView {
            node: device.node_id,
            endpoint: device.endpoint,
            device_type: device.device_type,
            name,
            topic_id: device.topic_id,
            attributes,
        });
    }

    Json(serde_json::json!({ "devices": views })).into_response()
}

#[derive(Debug, Deserialize)]
struct CommissionRequest {
    manual_pairing_code: Option<String>,
}

async fn commission(State(state): State<AppState>, Json(request): Json<CommissionRequest>) -> AxumResponse {
    let Some(code) = request.manual_pairing_code else {
        return error_response(StatusCode::BAD_REQUEST, "manual_pairing_code is required");
    };
    match state.commissioning.commission(&code).await {
        Ok(devices) => {
            for device in &devices {
                // "device-commissioned" signal (spec.md §4.7 step 8): add each newly
                // materialized endpoint to the polling set immediately, rather than waiting for
                // the next auto-discovery rescan.
                state.polling.add_device(device.node_id, device.endpoint).await;
                state.gateway_mqtt_publish(device).await;
            }
            Json(serde_json::json!({ "status": "success", "devices": devices })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

impl AppState {
    async fn gateway_mqtt_publish(&self, device: &Device) {
        if let Err(e) = self.mqtt.publish_device(device).await {
            tracing::warn!(message = "failed to publish newly commissioned device over mqtt", error = %e);
        }
    }
}

async fn delete_device(State(state): State<AppState>, Path((node, endpoint)): Path<(u64, u16)>) -> AxumResponse {
    let (node, endpoint) = (NodeId(node), EndpointId(endpoint));
    match state.registry.get_device(node, endpoint).await {
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Some(_)) => {}
    }
    match state.registry.delete_device(node, endpoint).await {
        Ok(()) => {
            state.polling.remove_device(node, endpoint).await;
            Json(serde_json::json!({ "status": "success" })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    name: String,
}

async fn rename_device(
    State(state): State<AppState>,
    Path((node, endpoint)): Path<(u64, u16)>,
    Json(request): Json<RenameRequest>,
) -> AxumResponse {
    if request.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name must not be empty");
    }
    let (node, endpoint) = (NodeId(node), EndpointId(endpoint));
    match state.registry.rename_device(node, endpoint, request.name).await {
        Ok(true) => Json(serde_json::json!({ "status": "success" })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    value: String,
}

async fn write_attribute(
    State(state): State<AppState>,
    Path((node, endpoint, cluster, attribute)): Path<(u64, u16, String, String)>,
    Json(request): Json<WriteRequest>,
) -> AxumResponse {
    let (node, endpoint) = (NodeId(node), EndpointId(endpoint));
    match state.registry.get_device(node, endpoint).await {
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Some(_)) => {}
    }
    let response = state.gateway.write(node, endpoint, &cluster, &attribute, &request.value).await;
    Json(response).into_response()
}

async fn execute_command(State(state): State<AppState>, Json(request): Json<CommandRequest>) -> AxumResponse {
    let (node, endpoint) = (request.node, request.endpoint);
    match state.registry.get_device(node, endpoint).await {
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Some(_)) => {}
    }
    let response = state.gateway.execute(request).await;
    Json(response).into_response()
}

async fn list_clusters(State(state): State<AppState>) -> AxumResponse {
    let names: Vec<&str> = ["OnOff", "LevelControl", "Descriptor", "BasicInformation"]
        .iter()
        .filter(|n| state.dict.cluster_id_by_name(n).is_some())
        .copied()
        .collect();
    Json(serde_json::json!({ "clusters": names })).into_response()
}

async fn list_device_types(State(_state): State<AppState>) -> AxumResponse {
    // Device-type enumeration is sourced from the XML device-type file per spec.md §1, which is
    // out of scope for this crate; the route exists so the contract is complete and returns an
    // empty catalog rather than 404ing.
    Json(serde_json::json!({ "device_types": [] })).into_response()
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> AxumResponse {
    ws.on_upgrade(move |socket| async move { state.broadcaster.serve(socket).await })
}
