use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use catalog::store::Transfer;

use crate::error::AppResult;
use crate::state::AppState;

use super::authorize_server;

#[derive(Debug, Serialize)]
pub struct TorrentSummary {
    pub package_id: Uuid,
    pub info_hash: String,
    pub piece_size: i64,
    pub total_pieces: i32,
}

pub async fn list_torrents(State(state): State<AppState>) -> AppResult<Json<Vec<TorrentSummary>>> {
    let rows = state.store.list_torrents().await?;
    Ok(Json(
        rows.into_iter()
            .map(|(package_id, info_hash, piece_size, total_pieces)| TorrentSummary {
                package_id,
                info_hash,
                piece_size,
                total_pieces,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct QueueTorrentRequest {
    pub package_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct QueueTorrentResponse {
    pub queue_item_id: Uuid,
}

/// Enqueues a descriptor-build job. The actual hashing claim is
/// taken by whichever node's builder polls and picks this row up, not here.
pub async fn queue_torrent(
    State(state): State<AppState>,
    Json(req): Json<QueueTorrentRequest>,
) -> AppResult<Json<QueueTorrentResponse>> {
    let queue_item_id = state.store.enqueue_build(req.package_id).await?;
    Ok(Json(QueueTorrentResponse { queue_item_id }))
}

pub async fn list_transfers(State(state): State<AppState>) -> AppResult<Json<Vec<Transfer>>> {
    Ok(Json(state.store.list_transfers().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    /// One torrent per package, so the torrent id and the package id it
    /// describes are the same value in this schema.
    pub torrent_id: Uuid,
    pub destination_server_id: Uuid,
    #[serde(default)]
    pub priority: i32,
}

pub async fn create_transfer(
    State(state): State<AppState>,
    Json(req): Json<CreateTransferRequest>,
) -> AppResult<Json<Transfer>> {
    let transfer = state
        .store
        .create_transfer(req.torrent_id, req.destination_server_id, req.priority)
        .await?;
    Ok(Json(transfer))
}

#[derive(Debug, Deserialize)]
pub struct TorrentStatusRequest {
    pub transfer_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub progress_percent: f64,
}

pub async fn torrent_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TorrentStatusRequest>,
) -> AppResult<()> {
    authorize_server(&state, id).await?;
    state
        .store
        .update_transfer_status(req.transfer_id, &req.status, req.progress_percent)
        .await?;
    Ok(())
}
