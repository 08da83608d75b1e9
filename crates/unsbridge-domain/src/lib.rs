pub mod aas;
pub mod error;
pub mod events;
pub mod types;


pub use aas::{AasEnvironment, AssetShell, Reference, Submodel, SubmodelElement};
pub use error::DomainError;
pub use events::{
    AckPayload, AssetLifecycle, CommandPayload, DriftAlert, DriftEventKind, LifecycleEvent,
    Severity,
};
pub use types::{AssetAddress, AssetUri, LeafKind, LeafRecord, LeafValue};
