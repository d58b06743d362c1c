//! Claim Coordinator (C5)
//!
//! Enforces that at most one server is hashing a given package at a time.
//! The actual linearization happens at the catalog store's unique primary
//! key on `package_id`; this module is the policy layer on top of it —
//! acquire/release semantics, staleness sweeps, and pre-emption checks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CatalogError, Result};

/// How long an unresponsive claim is allowed to live before the sweep
/// reclaims it.
pub const STALE_CLAIM_AGE: Duration = Duration::from_secs(3 * 60 * 60);
/// A queue row still counts as "alive" if it synced within this window.
pub const SYNC_GRACE_PERIOD: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct Claim {
    pub package_id: Uuid,
    pub server_id: Uuid,
    pub queue_item_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

/// What the claims table and the torrent queue table look like to this
/// module. The catalog store implements this against Postgres.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically inserts a claim row, keyed by `package_id`. Returns
    /// `Err(CatalogError::AlreadyClaimed)` on a primary-key conflict.
    async fn insert_claim(&self, claim: &Claim) -> Result<()>;

    /// Whether a torrent descriptor already exists for this package.
    async fn descriptor_exists(&self, package_id: Uuid) -> Result<bool>;

    async fn get_claim(&self, package_id: Uuid) -> Result<Option<Claim>>;

    async fn delete_claim(&self, package_id: Uuid) -> Result<()>;

    /// Claims older than `STALE_CLAIM_AGE` whose queue row isn't a
    /// `generating` job synced within `SYNC_GRACE_PERIOD`.
    async fn stale_claims(&self, now: DateTime<Utc>) -> Result<Vec<Claim>>;

    async fn mark_queue_generating(&self, queue_item_id: Uuid) -> Result<()>;

    async fn mark_queue_terminal(&self, queue_item_id: Uuid, status: &str, error: Option<&str>) -> Result<()>;
}

pub struct ClaimCoordinator<'a> {
    store: &'a dyn ClaimStore,
}

impl<'a> ClaimCoordinator<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store }
    }

    /// Attempts to acquire the hashing claim for `package_id`.
    ///
    /// Rejects with `AlreadyBuilt` if a descriptor already exists, and with
    /// `AlreadyClaimed` if another server holds the claim.
    pub async fn acquire(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        queue_item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Claim> {
        if self.store.descriptor_exists(package_id).await? {
            return Err(CatalogError::AlreadyBuilt(package_id));
        }

        let claim = Claim {
            package_id,
            server_id,
            queue_item_id,
            claimed_at: now,
        };

        self.store.insert_claim(&claim).await?;
        self.store.mark_queue_generating(queue_item_id).await?;
        Ok(claim)
    }

    /// Releases a claim on completion, failure, or cancellation, and marks
    /// the queue row terminal.
    pub async fn release(
        &self,
        package_id: Uuid,
        queue_item_id: Uuid,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        self.store.delete_claim(package_id).await?;
        self.store.mark_queue_terminal(queue_item_id, status, error).await?;
        Ok(())
    }

    /// Handles pre-emption: another site finished building while this one
    /// was mid-hash. The local job is cancelled; its checkpoints are
    /// discarded by the caller.
    pub async fn cancel_due_to_claim_lost(&self, package_id: Uuid, queue_item_id: Uuid) -> Result<()> {
        self.release(package_id, queue_item_id, "cancelled", Some("claim_lost")).await
    }

    /// Sweeps and releases claims abandoned by crashed builders.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let stale = self.store.stale_claims(now).await?;
        let mut released = Vec::with_capacity(stale.len());
        for claim in stale {
            self.store.delete_claim(claim.package_id).await?;
            released.push(claim.package_id);
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryClaimStore {
        claims: Mutex<HashMap<Uuid, Claim>>,
        descriptors: Mutex<std::collections::HashSet<Uuid>>,
        queue_status: Mutex<HashMap<Uuid, String>>,
    }

    #[async_trait]
    impl ClaimStore for MemoryClaimStore {
        async fn insert_claim(&self, claim: &Claim) -> Result<()> {
            let mut guard = self.claims.lock().await;
            if guard.contains_key(&claim.package_id) {
                let holder = guard[&claim.package_id].server_id;
                return Err(CatalogError::AlreadyClaimed {
                    package_id: claim.package_id,
                    holder,
                });
            }
            guard.insert(claim.package_id, claim.clone());
            Ok(())
        }

        async fn descriptor_exists(&self, package_id: Uuid) -> Result<bool> {
            Ok(self.descriptors.lock().await.contains(&package_id))
        }

        async fn get_claim(&self, package_id: Uuid) -> Result<Option<Claim>> {
            Ok(self.claims.lock().await.get(&package_id).cloned())
        }

        async fn delete_claim(&self, package_id: Uuid) -> Result<()> {
            self.claims.lock().await.remove(&package_id);
            Ok(())
        }

        async fn stale_claims(&self, now: DateTime<Utc>) -> Result<Vec<Claim>> {
            Ok(self
                .claims
                .lock()
                .await
                .values()
                .filter(|c| now.signed_duration_since(c.claimed_at).to_std().unwrap_or_default() > STALE_CLAIM_AGE)
                .cloned()
                .collect())
        }

        async fn mark_queue_generating(&self, queue_item_id: Uuid) -> Result<()> {
            self.queue_status.lock().await.insert(queue_item_id, "generating".to_string());
            Ok(())
        }

        async fn mark_queue_terminal(&self, queue_item_id: Uuid, status: &str, _error: Option<&str>) -> Result<()> {
            self.queue_status.lock().await.insert(queue_item_id, status.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_claim_attempt_loses() {
        let store = MemoryClaimStore::default();
        let coordinator = ClaimCoordinator::new(&store);
        let package_id = Uuid::new_v4();
        let now = Utc::now();

        let winner = coordinator.acquire(package_id, Uuid::new_v4(), Uuid::new_v4(), now).await;
        assert!(winner.is_ok());

        let loser = coordinator.acquire(package_id, Uuid::new_v4(), Uuid::new_v4(), now).await;
        match loser {
            Err(CatalogError::AlreadyClaimed { holder, .. }) => {
                assert_eq!(holder, winner.unwrap().server_id);
            }
            other => panic!("expected AlreadyClaimed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let store = MemoryClaimStore::default();
        let coordinator = ClaimCoordinator::new(&store);
        let package_id = Uuid::new_v4();
        let queue_item_id = Uuid::new_v4();
        let now = Utc::now();

        coordinator.acquire(package_id, Uuid::new_v4(), queue_item_id, now).await.unwrap();
        coordinator.release(package_id, queue_item_id, "completed", None).await.unwrap();

        let second = coordinator.acquire(package_id, Uuid::new_v4(), Uuid::new_v4(), now).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn existing_descriptor_rejects_claim() {
        let store = MemoryClaimStore::default();
        let package_id = Uuid::new_v4();
        store.descriptors.lock().await.insert(package_id);
        let coordinator = ClaimCoordinator::new(&store);

        let result = coordinator.acquire(package_id, Uuid::new_v4(), Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(result, Err(CatalogError::AlreadyBuilt(_))));
    }
}
