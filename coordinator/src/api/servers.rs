use axum::extract::{Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use catalog::store::{InventoryRow, InventoryStatus};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

use super::authorize_server;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub mac_address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub registration_key: Option<String>,
    #[serde(default)]
    pub storage_capacity_tb: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub server_id: Uuid,
    pub authorized: bool,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    let server = state
        .store
        .register_server(&req.mac_address, req.name.as_deref(), None, req.api_url.as_deref(), req.storage_capacity_tb)
        .await?;

    let mut authorized = server.is_authorized;
    if !authorized {
        if let (Some(expected), Some(provided)) = (&state.config.registration_key, &req.registration_key) {
            if expected == provided {
                state.store.set_authorized(server.id, true).await?;
                authorized = true;
            }
        }
    }

    Ok(Json(RegisterResponse {
        server_id: server.id,
        authorized,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub software_version: Option<String>,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<()> {
    authorize_server(&state, id).await?;
    state.store.heartbeat(id, req.software_version.as_deref()).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub token: Option<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub authorized: bool,
}

/// The token here is advisory only — the coordinator's real authorization
/// check is the `is_authorized` flag on the server row, consulted fresh on
/// every request. A client that can't reach this endpoint at all treats
/// itself as not authorized and suspends outbound work, fail-closed.
pub async fn auth_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<AuthStatusResponse>> {
    let server = state
        .store
        .get_server(id)
        .await?
        .ok_or_else(|| AppError::unauthorized("unknown server id"))?;

    let expires_at = Utc::now() + Duration::hours(24);
    Ok(Json(AuthStatusResponse {
        token: server.is_authorized.then(|| id.to_string()),
        expires_at: server.is_authorized.then_some(expires_at),
        authorized: server.is_authorized,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InventoryItem {
    pub package_id: Uuid,
    pub local_path: String,
    pub status: InventoryStatusWire,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatusWire {
    Online,
    Missing,
    Degraded,
}

impl From<InventoryStatusWire> for InventoryStatus {
    fn from(w: InventoryStatusWire) -> Self {
        match w {
            InventoryStatusWire::Online => InventoryStatus::Online,
            InventoryStatusWire::Missing => InventoryStatus::Missing,
            InventoryStatusWire::Degraded => InventoryStatus::Degraded,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InventoryRequest {
    pub packages: Vec<InventoryItem>,
}

pub async fn submit_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<InventoryRequest>,
) -> AppResult<()> {
    authorize_server(&state, id).await?;
    let rows: Vec<InventoryRow> = req
        .packages
        .into_iter()
        .map(|p| InventoryRow {
            server_id: id,
            package_id: p.package_id,
            local_path: p.local_path,
            status: p.status.into(),
        })
        .collect();
    state.store.upsert_inventory(&rows).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ScanResultRequest {
    pub packages_found: i64,
    pub added: i64,
    pub updated: i64,
    pub errors: i64,
}

pub async fn scan_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScanResultRequest>,
) -> AppResult<()> {
    authorize_server(&state, id).await?;
    state
        .store
        .record_scan_result(id, req.packages_found, req.added, req.updated, req.errors)
        .await?;
    Ok(())
}

/// `Upgrade` and `Restart` are part of the wire contract a client polls for,
/// but nothing in this coordinator emits them yet — there's no software
/// distribution channel or restart trigger wired up, so a client only ever
/// sees `Rescan`/`None`. Driving those two is operator-UI work, out of
/// scope here.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum PendingAction {
    Rescan,
    Upgrade { version: String },
    Restart,
    None,
}

pub async fn pending_action(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<PendingAction>> {
    let server = authorize_server(&state, id).await?;
    let action = if server.rescan_requested_at.is_some() {
        PendingAction::Rescan
    } else {
        PendingAction::None
    };
    Ok(Json(action))
}
