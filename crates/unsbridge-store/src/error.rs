use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    /// The database was written by an incompatible daemon version.
    #[error("state schema version {found} does not match expected {expected}")]
    SchemaVersion { found: u64, expected: u64 },
}
