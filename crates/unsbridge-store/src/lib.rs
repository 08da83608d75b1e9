pub mod error;
pub mod memory;
pub mod redb_store;
pub mod rows;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use redb_store::RedbStore;
pub use rows::{
    BirthMetric, ContextBundle, Fingerprint, FingerprintEntry, FidelityRow, LifecycleRow,
    TableCaps, TableKind, SCHEMA_VERSION,
};
pub use store::StateStore;
