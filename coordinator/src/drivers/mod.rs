//! Background drivers (C10): the periodic full scan, the filesystem watcher
//! that triggers an immediate rescan on change, the descriptor builder that
//! drains the hash-job queue, and the claim-staleness sweep that reclaims
//! abandoned hashing jobs.

mod builder;
mod ingest;
mod scan;
mod sweep;
mod watch;

pub use builder::run_build_driver;
pub use scan::run_scan_driver;
pub use sweep::run_claim_sweep_driver;
pub use watch::run_watch_driver;
