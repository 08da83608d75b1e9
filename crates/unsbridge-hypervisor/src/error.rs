use thiserror::Error;

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("store error: {0}")]
    Store(#[from] unsbridge_store::StoreError),

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("repository request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("repository rejected write: {0}")]
    WriteRejected(String),
}
