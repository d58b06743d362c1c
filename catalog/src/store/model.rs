//! Typed rows for the catalog schema (§3 of the design). Kept separate from
//! the repository methods so callers outside `catalog::store` never need to
//! know the table shapes, only these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub mac_address: String,
    pub display_name: Option<String>,
    pub software_version: Option<String>,
    pub is_authorized: bool,
    pub storage_capacity_tb: Option<f64>,
    pub api_url: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub rescan_requested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub assetmap_uuid: String,
    pub package_name: String,
    pub content_title: Option<String>,
    pub content_kind: Option<String>,
    pub total_size_bytes: i64,
    pub file_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewComposition {
    pub cpl_uuid: String,
    pub reel_count: i32,
    pub frame_rate: Option<String>,
    pub resolution: Option<String>,
    pub sound_config: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReel {
    pub reel_uuid: String,
    pub picture_asset_uuid: Option<String>,
    pub sound_asset_uuid: Option<String>,
    pub subtitle_asset_uuid: Option<String>,
    pub duration: i64,
    pub picture_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub asset_uuid: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub sha1_hex: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatus {
    Online,
    Missing,
    Degraded,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Online => "online",
            InventoryStatus::Missing => "missing",
            InventoryStatus::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryRow {
    pub server_id: Uuid,
    pub package_id: Uuid,
    pub local_path: String,
    pub status: InventoryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub package_id: Uuid,
    pub destination_server_id: Uuid,
    pub priority: i32,
    pub status: String,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Success => "success",
            ScanStatus::Partial => "partial",
            ScanStatus::Failed => "failed",
        }
    }
}
