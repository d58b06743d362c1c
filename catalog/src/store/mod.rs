//! Catalog Store (C3): the Postgres-backed source of truth for servers,
//! packages, inventory, and swarm state.

pub mod model;
pub mod postgres;

pub use model::{InventoryRow, InventoryStatus, NewAsset, NewComposition, NewReel, Package, ScanStatus, Server, Transfer};
pub use postgres::CatalogStore;
