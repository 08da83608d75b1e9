use unsbridge_codec::MessageKind;
use unsbridge_domain::AssetAddress;

use crate::error::AddressError;

/// Namespace of every lifecycle-plane topic.
pub const SPARKPLUG_NAMESPACE: &str = "spBv1.0";
/// Segment separating the address from the submodel path on the retained plane.
pub const CONTEXT_SEGMENT: &str = "context";
/// Suffix marking an inbound command topic.
pub const CMD_SUFFIX: &str = "/cmd";

/// Replace MQTT separator and wildcard characters so a path segment is safe
/// inside a topic. The original segment stays verbatim in the LeafRecord.
pub fn escape_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if matches!(c, '/' | '+' | '#') { '_' } else { c })
        .collect()
}

// ── Retained plane ────────────────────────────────────────────────────────────

/// `[prefix/]{enterprise}/{site}/{area}/{line}/{asset}/context/{submodel}/{path…}`
pub fn retained_topic(
    prefix: Option<&str>,
    address: &AssetAddress,
    submodel_id_short: &str,
    path: &[String],
) -> String {
    let mut topic = String::new();
    if let Some(p) = prefix.filter(|p| !p.is_empty()) {
        topic.push_str(p.trim_end_matches('/'));
        topic.push('/');
    }
    topic.push_str(&address.to_string());
    topic.push('/');
    topic.push_str(CONTEXT_SEGMENT);
    topic.push('/');
    topic.push_str(&escape_segment(submodel_id_short));
    for seg in path {
        topic.push('/');
        topic.push_str(&escape_segment(seg));
    }
    topic
}

/// Result of parsing a retained-plane (or command) topic back apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub address: AssetAddress,
    pub submodel_id_short: String,
    pub path: Vec<String>,
}

/// Inverse of [`retained_topic`] for escaped-clean topics. The command
/// handler uses this to map `…/context/{submodel}/{prop}` back to the leaf.
pub fn parse_retained_topic(
    prefix: Option<&str>,
    topic: &str,
) -> Result<ParsedTopic, AddressError> {
    let mut rest = topic;
    if let Some(p) = prefix.filter(|p| !p.is_empty()) {
        let p = p.trim_end_matches('/');
        rest = rest
            .strip_prefix(p)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| AddressError::MalformedTopic(topic.to_string()))?;
    }
    let segments: Vec<&str> = rest.split('/').collect();
    // address(5) + "context" + submodel + at least one path segment
    if segments.len() < 8 || segments[5] != CONTEXT_SEGMENT {
        return Err(AddressError::MalformedTopic(topic.to_string()));
    }
    let address = AssetAddress::new(
        segments[0], segments[1], segments[2], segments[3], segments[4],
    )
    .map_err(|_| AddressError::MalformedTopic(topic.to_string()))?;
    Ok(ParsedTopic {
        address,
        submodel_id_short: segments[6].to_string(),
        path: segments[7..].iter().map(|s| s.to_string()).collect(),
    })
}

/// Subscription pattern covering every command topic under the prefix.
pub fn command_subscription(prefix: Option<&str>) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(p) => format!("{}/+/+/+/+/+/{}/#", p.trim_end_matches('/'), CONTEXT_SEGMENT),
        None => format!("+/+/+/+/+/{}/#", CONTEXT_SEGMENT),
    }
}

/// The ack topic of a command topic, when `topic` is one.
pub fn strip_cmd_suffix(topic: &str) -> Option<&str> {
    topic.strip_suffix(CMD_SUFFIX)
}

// ── Lifecycle plane ───────────────────────────────────────────────────────────

/// `spBv1.0/{group}/{msgType}/{edgeNode}[/{device}]`
pub fn lifecycle_topic(
    group: &str,
    kind: MessageKind,
    edge_node: &str,
    device: Option<&str>,
) -> String {
    match device {
        Some(d) => format!("{SPARKPLUG_NAMESPACE}/{group}/{}/{edge_node}/{d}", kind.as_str()),
        None => format!("{SPARKPLUG_NAMESPACE}/{group}/{}/{edge_node}", kind.as_str()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLifecycleTopic {
    pub group: String,
    pub kind: MessageKind,
    pub edge_node: String,
    pub device: Option<String>,
}

pub fn parse_lifecycle_topic(topic: &str) -> Result<ParsedLifecycleTopic, AddressError> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.first() != Some(&SPARKPLUG_NAMESPACE) || !(4..=5).contains(&segments.len()) {
        return Err(AddressError::MalformedTopic(topic.to_string()));
    }
    let kind = MessageKind::parse(segments[2])
        .ok_or_else(|| AddressError::MalformedTopic(topic.to_string()))?;
    Ok(ParsedLifecycleTopic {
        group: segments[1].to_string(),
        kind,
        edge_node: segments[3].to_string(),
        device: segments.get(4).map(|s| s.to_string()),
    })
}

// ── System topics ─────────────────────────────────────────────────────────────

pub fn context_dict_topic(dictionary: &str, hash: &str) -> String {
    format!("UNS/Sys/Context/{dictionary}/{hash}")
}

pub fn drift_alert_topic(asset_id: &str) -> String {
    format!("UNS/Sys/DriftAlerts/{}", escape_segment(asset_id))
}

pub fn lifecycle_event_topic(asset_id: &str) -> String {
    format!("UNS/Sys/Lifecycle/{}", escape_segment(asset_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> AssetAddress {
        AssetAddress::new("Acme", "Berlin", "Hall1", "L1", "Press01").unwrap()
    }

    #[test]
    fn retained_topic_shape() {
        let topic = retained_topic(None, &addr(), "TechData", &["Motor".into(), "Temp".into()]);
        assert_eq!(topic, "Acme/Berlin/Hall1/L1/Press01/context/TechData/Motor/Temp");
    }

    #[test]
    fn prefix_is_prepended_once() {
        let topic = retained_topic(Some("factory/"), &addr(), "TechData", &["Temp".into()]);
        assert_eq!(topic, "factory/Acme/Berlin/Hall1/L1/Press01/context/TechData/Temp");
        // Empty prefix is a no-op.
        let topic = retained_topic(Some(""), &addr(), "TechData", &["Temp".into()]);
        assert!(topic.starts_with("Acme/"));
    }

    #[test]
    fn unsafe_path_segments_are_escaped() {
        let topic = retained_topic(None, &addr(), "Tech/Data", &["Te+mp#".into()]);
        assert_eq!(topic, "Acme/Berlin/Hall1/L1/Press01/context/Tech_Data/Te_mp_");
    }

    #[test]
    fn retained_topic_round_trips() {
        let path = vec!["Motor".to_string(), "Temp".to_string()];
        let topic = retained_topic(Some("uns"), &addr(), "TechData", &path);
        let parsed = parse_retained_topic(Some("uns"), &topic).unwrap();
        assert_eq!(parsed.address, addr());
        assert_eq!(parsed.submodel_id_short, "TechData");
        assert_eq!(parsed.path, path);
    }

    #[test]
    fn parse_rejects_foreign_topics() {
        assert!(parse_retained_topic(None, "a/b/c").is_err());
        assert!(parse_retained_topic(None, "a/b/c/d/e/notcontext/sm/p").is_err());
        assert!(parse_retained_topic(Some("uns"), "other/a/b/c/d/e/context/sm/p").is_err());
    }

    #[test]
    fn lifecycle_topic_shapes() {
        use unsbridge_codec::MessageKind;
        assert_eq!(
            lifecycle_topic("plant", MessageKind::NBirth, "edge-1", None),
            "spBv1.0/plant/NBIRTH/edge-1"
        );
        assert_eq!(
            lifecycle_topic("plant", MessageKind::DData, "edge-1", Some("Press01")),
            "spBv1.0/plant/DDATA/edge-1/Press01"
        );
    }

    #[test]
    fn lifecycle_topic_round_trips() {
        use unsbridge_codec::MessageKind;
        let topic = lifecycle_topic("plant", MessageKind::DBirth, "edge-1", Some("Press01"));
        let parsed = parse_lifecycle_topic(&topic).unwrap();
        assert_eq!(parsed.kind, MessageKind::DBirth);
        assert_eq!(parsed.device.as_deref(), Some("Press01"));
        assert!(parse_lifecycle_topic("spAv1.0/g/NBIRTH/e").is_err());
    }

    #[test]
    fn command_subscription_shape() {
        assert_eq!(command_subscription(None), "+/+/+/+/+/context/#");
        assert_eq!(command_subscription(Some("uns")), "uns/+/+/+/+/+/context/#");
    }

    #[test]
    fn cmd_suffix_strips() {
        assert_eq!(
            strip_cmd_suffix("a/b/context/sm/p/cmd"),
            Some("a/b/context/sm/p")
        );
        assert_eq!(strip_cmd_suffix("a/b/context/sm/p"), None);
    }
}
