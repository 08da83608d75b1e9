//! Lifecycle-plane wire format.
//!
//! Sparkplug-B-compatible protobuf payloads, expressed as prost derives so
//! no build-time schema compilation is needed. Only the message subset the
//! bridge emits is modeled: metric name/alias/timestamp/datatype, the scalar
//! value oneof, and string properties for the enriched mode.

pub mod datatype;
pub mod error;
pub mod payload;

pub use datatype::DataType;
pub use error::CodecError;
pub use payload::{
    MessageKind, Metric, MetricValue, PropertySet, PropertyValue, PropertyValueKind,
    SparkplugPayload, BD_SEQ_METRIC, REBIRTH_METRIC,
};
