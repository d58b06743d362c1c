use std::sync::Arc;

use catalog::CatalogStore;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CatalogStore>,
    pub config: Arc<Config>,
    /// Identifies this coordinator process as a claim holder and checkpoint
    /// namespace for the builder driver. Not a `servers` row — the builder
    /// runs in-process against the local `scan_path`, so it never needs to
    /// be looked up or authorized like a remote site.
    pub local_server_id: Uuid,
    /// Caps concurrent descriptor-hashing jobs per node (default
    /// 1) to protect local disk bandwidth. Acquired by the builder driver
    /// around each `descriptor::build` call.
    pub hashing_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(store: CatalogStore, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
            local_server_id: Uuid::new_v4(),
            hashing_permits: Arc::new(Semaphore::new(1)),
        }
    }
}
