use thiserror::Error;

/// Error taxonomy for the catalog crate.
///
/// Variants line up with the classification in the coordinator's error
/// handling design: transient I/O, malformed input, identity/authorization,
/// claim loss, capacity, and an `Internal` catch-all for anything that
/// doesn't fit one of the named buckets.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed manifest at {path}: {reason}")]
    MalformedManifest { path: String, reason: String },

    #[error("package not found: {0}")]
    NotFound(String),

    #[error("claim already held for package {package_id} by server {holder}")]
    AlreadyClaimed {
        package_id: uuid::Uuid,
        holder: uuid::Uuid,
    },

    #[error("descriptor already built for package {0}")]
    AlreadyBuilt(uuid::Uuid),

    #[error("build cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
