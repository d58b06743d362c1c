//! Builder driver: the runtime path for spec scenarios 2 and 3 (coordinator
//! enqueues a hash job, C5 arbitrates, the winning site runs C4 and
//! announces the result). `catalog::claims` and `catalog::descriptor` only
//! exercise this flow from unit tests against in-memory fakes; this module
//! is what actually drains `torrent_queue` in a running coordinator.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use catalog::claims::ClaimCoordinator;
use catalog::{descriptor, discover_packages, CatalogError, ClaimStore};
use chrono::Utc;

use crate::state::AppState;

/// Spawns the polling loop that claims and builds one queued job per pass.
pub fn run_build_driver(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = try_build_next(&state).await {
                tracing::warn!(error = %err, "build driver pass failed");
            }
        }
    })
}

async fn try_build_next(state: &AppState) -> catalog::Result<()> {
    let Some((queue_item_id, package_id)) = state.store.claim_next_queued_build().await? else {
        return Ok(());
    };

    // Held for the lifetime of the build below; this is the default-1
    // concurrent-hash cap.
    let _permit = state
        .hashing_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| CatalogError::Internal("hashing semaphore closed".to_string()))?;

    let coordinator = ClaimCoordinator::new(state.store.as_ref());
    let claim = match coordinator
        .acquire(package_id, state.local_server_id, queue_item_id, Utc::now())
        .await
    {
        Ok(claim) => claim,
        Err(CatalogError::AlreadyBuilt(_)) => {
            // Not our loss to report: this duplicate queue row is skipped,
            // not failed. Releasing would delete the real owner's claim, so
            // mark the row terminal directly instead.
            state
                .store
                .mark_queue_terminal(queue_item_id, "skipped", Some("descriptor already exists"))
                .await?;
            return Ok(());
        }
        Err(CatalogError::AlreadyClaimed { holder, .. }) => {
            tracing::debug!(%package_id, %holder, "build already claimed by another process");
            state
                .store
                .mark_queue_terminal(queue_item_id, "skipped", Some("claimed by another process"))
                .await?;
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let package = state
        .store
        .get_package(package_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("package {package_id}")))?;

    let package_root = match resolve_package_root(state, &package.package_name) {
        Some(root) => root,
        None => {
            coordinator
                .release(package_id, queue_item_id, "failed", Some("package root not found under scan_path"))
                .await?;
            return Ok(());
        }
    };

    // Peers discover torrents through the coordinator's REST API
    // (`GET /torrents`), not a classic BitTorrent tracker endpoint, but the
    // bencoded `announce` field is still populated for clients that expect one.
    let announce = format!("http://0.0.0.0:{}/torrents", state.config.api_port);
    let cancel = AtomicBool::new(false);

    match descriptor::build(
        &package_root,
        &package.package_name,
        package_id,
        claim.server_id,
        &announce,
        state.store.as_ref(),
        &cancel,
    )
    .await
    {
        Ok(desc) => {
            state
                .store
                .insert_torrent(
                    package_id,
                    &desc.info_hash_hex,
                    &desc.bencoded,
                    desc.piece_length as i64,
                    desc.total_pieces as i32,
                )
                .await?;
            coordinator.release(package_id, queue_item_id, "completed", None).await?;
            tracing::info!(%package_id, info_hash = %desc.info_hash_hex, pieces = desc.total_pieces, "descriptor built and announced");
        }
        Err(CatalogError::Cancelled(reason)) => {
            coordinator.cancel_due_to_claim_lost(package_id, queue_item_id).await?;
            tracing::warn!(%package_id, %reason, "descriptor build cancelled");
        }
        Err(err) => {
            coordinator
                .release(package_id, queue_item_id, "failed", Some(&err.to_string()))
                .await?;
            tracing::warn!(%package_id, error = %err, "descriptor build failed");
        }
    }

    Ok(())
}

/// Re-walks `scan_path` for the package root matching `package_name`. The
/// catalog doesn't keep a package's filesystem path as a row — rediscovery
/// is cheap at this driver's 10-second poll interval and stays correct
/// across rescans that move a package under a different parent directory.
fn resolve_package_root(state: &AppState, package_name: &str) -> Option<PathBuf> {
    let scan_root = PathBuf::from(&state.config.scan_path);
    discover_packages(&scan_root)
        .into_iter()
        .find(|root| root.root.file_name().map(|n| n.to_string_lossy() == package_name).unwrap_or(false))
        .map(|root| root.root)
}
