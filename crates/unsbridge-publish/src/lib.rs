//! The dual-plane publish pipeline: retained state topics with hash-based
//! deduplication, and the Sparkplug-style lifecycle session.

pub mod error;
pub mod lifecycle;
pub mod retained;

pub use error::PublishError;
pub use lifecycle::{LifecycleEngine, MetricSample, SessionState};
pub use retained::RetainedPublisher;
