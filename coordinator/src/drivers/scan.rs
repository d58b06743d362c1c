use std::path::Path;
use std::time::Duration;

use catalog::discovery::discover_packages;
use catalog::store::ScanStatus;

use crate::state::AppState;

use super::ingest::ingest_package;

/// Runs one full scan pass over `scan_path`, recording a scan log row.
pub async fn scan_once(state: &AppState, server_id: Option<uuid::Uuid>) {
    let scan_root = Path::new(&state.config.scan_path).to_path_buf();
    let log_id = match state.store.start_scan_log(server_id).await {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(error = %err, "failed to start scan log");
            return;
        }
    };

    let roots = discover_packages(&scan_root);
    let mut added = 0i64;
    let mut errors = 0i64;
    for pkg in &roots {
        let outcome = ingest_package(&state.store, pkg).await;
        added += outcome.added;
        errors += outcome.errors;
    }

    let status = if errors > 0 && added == 0 {
        ScanStatus::Failed
    } else {
        ScanStatus::Success
    };

    if let Err(err) = state
        .store
        .finish_scan_log(log_id, status, roots.len() as i64, added, 0, errors)
        .await
    {
        tracing::warn!(error = %err, "failed to finish scan log");
    }

    tracing::info!(found = roots.len(), added, errors, "scan pass complete");
}

/// Spawns the periodic full-scan task, firing every
/// `scan_interval_hours`.
pub fn run_scan_driver(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.scan_interval_hours.max(1) * 3600);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            scan_once(&state, None).await;
        }
    })
}
