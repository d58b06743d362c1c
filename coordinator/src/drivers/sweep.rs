use std::time::Duration;

use catalog::claims::ClaimCoordinator;
use chrono::Utc;

use crate::state::AppState;

/// Periodically reclaims hashing claims abandoned by crashed builders
/// (the stale-claim sweep, driven by `STALE_CLAIM_AGE`).
pub fn run_claim_sweep_driver(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let coordinator = ClaimCoordinator::new(state.store.as_ref());
            match coordinator.sweep_stale(Utc::now()).await {
                Ok(released) if !released.is_empty() => {
                    tracing::info!(count = released.len(), "reclaimed stale hashing claims");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "claim sweep failed"),
            }
        }
    })
}
