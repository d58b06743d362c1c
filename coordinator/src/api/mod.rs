//! Coordinator API (C9): the HTTP/JSON control-plane surface.

mod dcps;
mod servers;
mod torrents;

use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use crate::error::AppResult;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/servers/register", post(servers::register))
        .route("/servers/:id/heartbeat", post(servers::heartbeat))
        .route("/servers/:id/auth-status", get(servers::auth_status))
        .route("/servers/:id/inventory", post(servers::submit_inventory))
        .route("/servers/:id/scan-result", post(servers::scan_result))
        .route("/servers/:id/pending-action", get(servers::pending_action))
        .route("/servers/:id/torrent-status", post(torrents::torrent_status))
        .route("/dcps", get(dcps::list_dcps))
        .route("/dcps/:uuid", get(dcps::get_dcp))
        .route("/torrents", get(torrents::list_torrents))
        .route("/torrents/queue", post(torrents::queue_torrent))
        .route("/transfers", get(torrents::list_transfers).post(torrents::create_transfer))
        .with_state(state)
}

/// Verifies `server_id` exists and is authorized. Unknown id -> 401
/// §4.8 "unknown"); present but not authorized -> 403.
pub(crate) async fn authorize(state: &AppState, server_id: Uuid) -> AppResult<catalog::store::Server> {
    match state.store.get_server(server_id).await? {
        None => Err(crate::error::AppError::unauthorized("unknown server id")),
        Some(server) if !server.is_authorized => Err(crate::error::AppError::forbidden("server not authorized")),
        Some(server) => Ok(server),
    }
}

pub(crate) use authorize as authorize_server;
