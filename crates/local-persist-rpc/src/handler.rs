//! Docker volume plugin protocol handlers.
//!
//! Every endpoint is a POST with a JSON body and answers HTTP 200; failures
//! are reported in the `Err` field as the protocol requires.

use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use local_persist::Volume;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Content type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

// ============================================================================
// Protocol types
// ============================================================================

/// Body of a `/VolumeDriver.*` request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub opts: Option<HashMap<String, String>>,
    /// Caller id sent with Mount/Unmount; only logged.
    #[serde(default, rename = "ID")]
    pub id: Option<String>,
}

/// A volume as the plugin protocol reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginVolume {
    pub name: String,
    /// Absolute path on the host.
    pub mountpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub scope: String,
}

/// Body of every `/VolumeDriver.*` response.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<PluginVolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<PluginVolume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capability>,
}

impl PluginResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
            ..Self::default()
        }
    }

    fn mountpoint(path: &Path) -> Self {
        Self {
            mountpoint: Some(path.display().to_string()),
            ..Self::default()
        }
    }
}

impl IntoResponse for PluginResponse {
    fn into_response(self) -> Response {
        plugin_json(&self)
    }
}

fn plugin_json<T: Serialize>(body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to serialize plugin response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Docker may send an empty body; treat it as an empty request.
fn parse_request(body: &Bytes) -> Result<PluginRequest, PluginResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PluginRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        warn!("Malformed plugin request: {}", e);
        PluginResponse::error(format!("Malformed request body: {e}"))
    })
}

macro_rules! parse_or_reply {
    ($body:expr) => {
        match parse_request(&$body) {
            Ok(request) => request,
            Err(response) => return response,
        }
    };
}

fn not_found(name: &str) -> PluginResponse {
    PluginResponse::error(format!("No volume found with the name {}", name))
}

fn to_plugin_volume(state: &AppState, volume: Volume) -> PluginVolume {
    let path = volume.resolve(state.driver.registry().base_dir());
    PluginVolume {
        name: volume.name,
        mountpoint: path.display().to_string(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn handle_activate() -> Response {
    debug!("Activate called");
    plugin_json(&json!({"Implements": ["VolumeDriver"]}))
}

pub async fn handle_capabilities() -> PluginResponse {
    debug!("Capabilities called");
    PluginResponse {
        capabilities: Some(Capability {
            scope: "local".to_string(),
        }),
        ..PluginResponse::default()
    }
}

pub async fn handle_create(State(state): State<Arc<AppState>>, body: Bytes) -> PluginResponse {
    let request = parse_or_reply!(body);
    debug!("Create called for {}", request.name);

    let options = request.opts.unwrap_or_default();
    match state.driver.registry().create(&request.name, &options).await {
        Ok(()) => PluginResponse::ok(),
        Err(e) => {
            warn!("Create {} failed: {}", request.name, e);
            PluginResponse::error(e.to_string())
        }
    }
}

pub async fn handle_remove(State(state): State<Arc<AppState>>, body: Bytes) -> PluginResponse {
    let request = parse_or_reply!(body);
    debug!("Remove called for {}", request.name);

    state.driver.registry().remove(&request.name).await;
    PluginResponse::ok()
}

pub async fn handle_get(State(state): State<Arc<AppState>>, body: Bytes) -> PluginResponse {
    let request = parse_or_reply!(body);
    debug!("Get called for {}", request.name);

    match state.driver.registry().lookup(&request.name).await {
        Some(volume) => PluginResponse {
            volume: Some(to_plugin_volume(&state, volume)),
            ..PluginResponse::default()
        },
        None => {
            debug!("Couldn't find {}", request.name);
            not_found(&request.name)
        }
    }
}

pub async fn handle_list(State(state): State<Arc<AppState>>) -> PluginResponse {
    let volumes: Vec<PluginVolume> = state
        .driver
        .registry()
        .list_all()
        .await
        .into_iter()
        .map(|v| to_plugin_volume(&state, v))
        .collect();
    debug!("List called, found {} volume(s)", volumes.len());

    PluginResponse {
        volumes: Some(volumes),
        ..PluginResponse::default()
    }
}

pub async fn handle_mount(State(state): State<Arc<AppState>>, body: Bytes) -> PluginResponse {
    let request = parse_or_reply!(body);
    let registry = state.driver.registry();

    let path = registry.mount(&request.name).await;
    if registry.is_unresolved(&path) {
        return not_found(&request.name);
    }
    debug!("Mount {} for caller {:?}", request.name, request.id);
    PluginResponse::mountpoint(&path)
}

pub async fn handle_path(State(state): State<Arc<AppState>>, body: Bytes) -> PluginResponse {
    let request = parse_or_reply!(body);
    let registry = state.driver.registry();

    let path = registry.path(&request.name).await;
    if registry.is_unresolved(&path) {
        return not_found(&request.name);
    }
    PluginResponse::mountpoint(&path)
}

/// Unmount has nothing to undo, so an unknown name still succeeds.
pub async fn handle_unmount(State(state): State<Arc<AppState>>, body: Bytes) -> PluginResponse {
    let request = parse_or_reply!(body);
    let path = state.driver.registry().unmount(&request.name).await;
    debug!("Unmount {} for caller {:?}", request.name, request.id);
    PluginResponse::mountpoint(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_body() {
        let request = parse_request(&Bytes::from_static(b"")).unwrap();
        assert!(request.name.is_empty());
        assert!(request.opts.is_none());
    }

    #[test]
    fn test_parse_create_body() {
        let body = Bytes::from_static(br#"{"Name":"vol1","Opts":{"mountpoint":"data/vol1"}}"#);
        let request = parse_request(&body).unwrap();
        assert_eq!(request.name, "vol1");
        assert_eq!(
            request.opts.unwrap().get("mountpoint").map(String::as_str),
            Some("data/vol1")
        );
    }

    #[test]
    fn test_parse_null_opts() {
        let body = Bytes::from_static(br#"{"Name":"vol1","Opts":null}"#);
        let request = parse_request(&body).unwrap();
        assert!(request.opts.is_none());
    }

    #[test]
    fn test_parse_malformed_body() {
        let response = parse_request(&Bytes::from_static(b"{oops")).unwrap_err();
        assert!(response.err.starts_with("Malformed request body"));
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let value = serde_json::to_value(PluginResponse::ok()).unwrap();
        assert_eq!(value, json!({}));

        let value = serde_json::to_value(PluginResponse::error("boom")).unwrap();
        assert_eq!(value, json!({"Err": "boom"}));
    }
}
