use std::path::Path;

use unsbridge_config::{load_config, ConfigError, PayloadMode, Qos, ValidationLevel};
use unsbridge_domain::{DriftEventKind, LeafKind, Severity};

#[test]
fn load_valid_fixture() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/config.yml");
    let config = load_config(&path).expect("should load without error");

    assert_eq!(config.broker.host, "localhost");
    assert_eq!(config.retained.qos, Qos::AtLeastOnce);
    assert_eq!(config.retained.mode, PayloadMode::Hybrid);
    assert_eq!(config.lifecycle.edge_node_id, "edge-1");
    assert_eq!(config.mapping.default.enterprise, "Acme");
    assert_eq!(config.mapping.patterns.len(), 1);
    assert_eq!(config.state.caps.hashes, 50_000);
    // Uncapped tables keep their defaults.
    assert_eq!(config.state.caps.aliases, 100_000);
    assert_eq!(config.semantic.level, ValidationLevel::Warn);
    assert_eq!(config.semantic.required_for_types, vec![LeafKind::Property]);
    let constraint = &config.semantic.constraints["0173-1#02-AAB663#001"];
    assert_eq!(constraint.max, Some(180.0));
    assert_eq!(config.hypervisor.stale_seconds, 120);
    assert_eq!(
        config.hypervisor.drift_severity[&DriftEventKind::MetricAdded],
        Severity::Medium
    );
    assert_eq!(config.daemon.parallelism, 4);
}

#[test]
fn unknown_keys_are_rejected() {
    let doc = r#"
broker:
  host: localhost
  bogus_option: true
lifecycle:
  group_id: g
  edge_node_id: e
mapping:
  default: { enterprise: A, site: B, area: C, line: D }
state:
  dir: /tmp/state
"#;
    let err = unsbridge_config::parse_config(doc, "inline").unwrap_err();
    assert!(matches!(err, ConfigError::YamlParse { .. }));
}

#[test]
fn bad_qos_is_rejected() {
    let doc = r#"
broker:
  host: localhost
retained:
  qos: 7
lifecycle:
  group_id: g
  edge_node_id: e
mapping:
  default: { enterprise: A, site: B, area: C, line: D }
state:
  dir: /tmp/state
"#;
    let err = unsbridge_config::parse_config(doc, "inline").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
}

#[test]
fn reconnect_window_must_be_ordered() {
    let doc = r#"
broker:
  host: localhost
lifecycle:
  group_id: g
  edge_node_id: e
  reconnect_min_secs: 90
  reconnect_max_secs: 30
mapping:
  default: { enterprise: A, site: B, area: C, line: D }
state:
  dir: /tmp/state
"#;
    assert!(unsbridge_config::parse_config(doc, "inline").is_err());
}

#[test]
fn missing_file_returns_error() {
    let err = load_config(Path::new("/nonexistent/unsbridge.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn minimal_config_uses_defaults() {
    let doc = r#"
broker:
  host: broker.example.com
lifecycle:
  group_id: plant
  edge_node_id: edge
mapping:
  default: { enterprise: A, site: B, area: C, line: D }
state:
  dir: /tmp/state
"#;
    let config = unsbridge_config::parse_config(doc, "inline").unwrap();
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.retained.mode, PayloadMode::Inline);
    assert!(config.retained.enabled);
    assert_eq!(config.semantic.level, ValidationLevel::Off);
    assert!(config.daemon.parallelism >= 2);
    assert_eq!(config.daemon.shutdown_deadline_secs, 30);
}
