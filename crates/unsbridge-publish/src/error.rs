use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker error: {0}")]
    Broker(#[from] unsbridge_broker::BrokerError),

    #[error("store error: {0}")]
    Store(#[from] unsbridge_store::StoreError),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    /// Whether the failure came from the persistence layer, which the error
    /// policy escalates after one retry.
    pub fn is_persistence(&self) -> bool {
        matches!(self, PublishError::Store(_))
    }
}
