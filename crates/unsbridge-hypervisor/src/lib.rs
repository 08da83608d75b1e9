//! The semantic hypervisor: everything that watches the leaf stream rather
//! than carrying it. Pre-publish validation, the pointer-mode context cache,
//! schema and streaming drift detection, per-asset liveness tracking, the
//! broker→AAS command path, and fidelity scoring.

pub mod command;
pub mod context;
pub mod drift;
pub mod error;
pub mod fidelity;
pub mod hst;
pub mod lifecycle;
pub mod validate;

pub use command::{
    CommandDisposition, CommandHandler, CommandOutcome, HttpRepositoryWriter, MetadataIndex,
    RepositoryWriter,
};
pub use context::{context_hash, ContextCache};
pub use drift::DriftDetector;
pub use error::HypervisorError;
pub use fidelity::{FidelityEvaluator, SnapshotStats};
pub use hst::HalfSpaceForest;
pub use lifecycle::LifecycleTracker;
pub use validate::{Outcome, Validator};
