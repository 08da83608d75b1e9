//! Addressing: where an asset lives in the industrial hierarchy, and how
//! that location spells as broker topics on both planes.

pub mod error;
pub mod mapping;
pub mod topic;

pub use error::AddressError;
pub use mapping::{AddressResolver, AddressSpec, MappingRules, PatternRule};
pub use topic::{
    command_subscription, context_dict_topic, drift_alert_topic, escape_segment,
    lifecycle_event_topic, lifecycle_topic, parse_lifecycle_topic, parse_retained_topic,
    retained_topic, strip_cmd_suffix, ParsedLifecycleTopic, ParsedTopic, CMD_SUFFIX,
    CONTEXT_SEGMENT, SPARKPLUG_NAMESPACE,
};
