use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("address configuration error: {0}")]
    Address(#[from] unsbridge_address::AddressError),

    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] unsbridge_hypervisor::HypervisorError),

    #[error("store error: {0}")]
    Store(#[from] unsbridge_store::StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] unsbridge_broker::BrokerError),

    #[error("publish error: {0}")]
    Publish(#[from] unsbridge_publish::PublishError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence failed twice in a row; the error policy makes this fatal.
    #[error("persistence failure escalated: {0}")]
    PersistenceFatal(String),
}
