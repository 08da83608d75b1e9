//! The broker seam.
//!
//! The daemon talks to its message broker exclusively through
//! [`BrokerClient`], so the transport binding (MQTT or otherwise) stays out
//! of the processing spine. [`InMemoryBroker`] implements the same contract
//! against process-local state for tests and dry runs.

pub mod client;
pub mod error;
pub mod memory;

pub use client::{BrokerClient, ConnectOptions, InboundMessage, LastWill};
pub use error::BrokerError;
pub use memory::{topic_matches, InMemoryBroker, PublishedMessage};
