use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("empty address segment: {segment}")]
    EmptyAddressSegment { segment: &'static str },

    #[error("address segment {segment} contains topic wildcard or separator: {value}")]
    UnsafeAddressSegment { segment: &'static str, value: String },

    #[error("leaf path must not be empty")]
    EmptyLeafPath,

    #[error("invalid value for type {value_type}: {raw}")]
    InvalidValue { value_type: String, raw: String },
}
