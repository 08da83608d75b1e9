//! Flattening of AAS submodels into ordered leaf records.
//!
//! Traversal is deterministic: depth-first, child order as encountered in
//! the source, so two runs over the same document emit the same sequence.

pub mod error;
pub mod flatten;

pub use error::ElementError;
pub use flatten::{flatten_environment, flatten_submodel, Flattened};
