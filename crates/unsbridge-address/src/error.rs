use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("invalid address segment in mapping: {0}")]
    InvalidSegment(#[from] unsbridge_domain::DomainError),

    #[error("topic does not match the retained-plane shape: {0}")]
    MalformedTopic(String),
}
