use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected")]
    NotConnected,

    /// Transient transport failure; the caller reconnects with backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker refused the session; retrying is pointless.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
}

impl BrokerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::AuthRejected(_))
    }
}
