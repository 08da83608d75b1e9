use std::collections::HashMap;
use std::path::Path;

use tracing::debug;
use unsbridge_domain::{DriftEventKind, LeafKind, Severity};

use crate::error::ConfigError;
use crate::raw::{
    RawAddressSpec, RawConfig, RawHypervisor, RawMapping, RawSemantic, RawState,
};
use crate::types::*;

/// Load and validate the daemon configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_config(&content, &path.display().to_string())
}

/// Parse a YAML config document. `path` is only used in error messages.
pub fn parse_config(content: &str, path: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse {
        path: path.to_string(),
        source: e,
    })?;
    convert(raw, path)
}

fn convert(raw: RawConfig, path: &str) -> Result<Config, ConfigError> {
    let qos = Qos::from_level(raw.retained.qos).ok_or_else(|| ConfigError::Invalid {
        path: path.to_string(),
        message: format!("retained.qos must be 0, 1 or 2, got {}", raw.retained.qos),
    })?;
    let mode = parse_mode(&raw.retained.mode, path)?;

    if raw.lifecycle.reconnect_min_secs > raw.lifecycle.reconnect_max_secs {
        return Err(ConfigError::Invalid {
            path: path.to_string(),
            message: "lifecycle.reconnect_min_secs exceeds reconnect_max_secs".to_string(),
        });
    }

    let config = Config {
        broker: BrokerConfig {
            host: raw.broker.host,
            port: raw.broker.port,
            client_id: raw.broker.client_id,
            username: raw.broker.username,
            password: raw.broker.password,
            keep_alive_secs: raw.broker.keep_alive_secs,
        },
        retained: RetainedConfig {
            enabled: raw.retained.enabled,
            prefix: raw.retained.prefix,
            qos,
            mode,
            enriched: raw.retained.enriched,
            dictionary: raw.retained.dictionary,
        },
        lifecycle: LifecycleConfig {
            enabled: raw.lifecycle.enabled,
            group_id: raw.lifecycle.group_id,
            edge_node_id: raw.lifecycle.edge_node_id,
            reconnect_min_secs: raw.lifecycle.reconnect_min_secs,
            reconnect_max_secs: raw.lifecycle.reconnect_max_secs,
        },
        mapping: convert_mapping(raw.mapping),
        watcher: WatcherConfig {
            paths: raw.watcher.paths.into_iter().map(Into::into).collect(),
            poll_interval_secs: raw.watcher.poll_interval_secs,
        },
        repository: RepositoryConfig {
            base_url: raw.repository.base_url,
            poll_interval_secs: raw.repository.poll_interval_secs,
            timeout_secs: raw.repository.timeout_secs,
            write_retry_max: raw.repository.write_retry_max,
            write_retry_base_ms: raw.repository.write_retry_base_ms,
        },
        state: convert_state(raw.state),
        observability: ObservabilityConfig {
            listen: raw.observability.listen,
            log_filter: raw.observability.log_filter,
        },
        semantic: convert_semantic(raw.semantic, path)?,
        hypervisor: convert_hypervisor(raw.hypervisor, path)?,
        daemon: DaemonConfig {
            parallelism: if raw.daemon.parallelism == 0 {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2)
                    .max(2)
            } else {
                raw.daemon.parallelism
            },
            queue_depth: raw.daemon.queue_depth.max(1),
            shutdown_deadline_secs: raw.daemon.shutdown_deadline_secs,
        },
    };
    debug!(path, "configuration loaded");
    Ok(config)
}

fn convert_spec(raw: RawAddressSpec) -> AddressSpecConfig {
    AddressSpecConfig {
        enterprise: raw.enterprise,
        site: raw.site,
        area: raw.area,
        line: raw.line,
        asset: raw.asset,
    }
}

fn convert_mapping(raw: RawMapping) -> MappingConfig {
    MappingConfig {
        assets: raw
            .assets
            .into_iter()
            .map(|(k, v)| (k, convert_spec(v)))
            .collect(),
        patterns: raw
            .patterns
            .into_iter()
            .map(|p| PatternRuleConfig {
                pattern: p.pattern,
                spec: AddressSpecConfig {
                    enterprise: p.enterprise,
                    site: p.site,
                    area: p.area,
                    line: p.line,
                    asset: p.asset,
                },
            })
            .collect(),
        default: convert_spec(raw.default),
    }
}

fn convert_state(raw: RawState) -> StateConfig {
    StateConfig {
        dir: raw.dir.into(),
        caps: TableCapsConfig {
            aliases: raw.caps.aliases,
            births: raw.caps.births,
            hashes: raw.caps.hashes,
            fingerprints: raw.caps.fingerprints,
            lifecycle: raw.caps.lifecycle,
            context: raw.caps.context,
            fidelity: raw.caps.fidelity,
            drift_model: raw.caps.drift_model,
        },
    }
}

fn convert_semantic(raw: RawSemantic, path: &str) -> Result<SemanticConfig, ConfigError> {
    let level = ValidationLevel::from_level(raw.level).ok_or_else(|| ConfigError::Invalid {
        path: path.to_string(),
        message: format!("semantic.level must be 0, 1 or 2, got {}", raw.level),
    })?;
    let required_for_types = raw
        .required_for_types
        .iter()
        .map(|s| parse_leaf_kind(s, path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SemanticConfig {
        level,
        enforce_semantic_ids: raw.enforce_semantic_ids,
        required_for_types,
        reject_invalid: raw.reject_invalid,
        constraints: raw
            .constraints
            .into_iter()
            .map(|(k, v)| {
                (
                    k,
                    SemanticConstraint {
                        min: v.min,
                        max: v.max,
                        unit: v.unit,
                        pattern: v.pattern,
                    },
                )
            })
            .collect(),
    })
}

fn convert_hypervisor(raw: RawHypervisor, path: &str) -> Result<HypervisorConfig, ConfigError> {
    let mut drift_severity = HashMap::new();
    for (kind, severity) in &raw.drift_severity {
        drift_severity.insert(parse_drift_kind(kind, path)?, parse_severity(severity, path)?);
    }
    let f = &raw.fidelity;
    let weight_sum = f.weight_structural + f.weight_semantic + f.weight_entropy;
    if weight_sum <= 0.0 {
        return Err(ConfigError::Invalid {
            path: path.to_string(),
            message: "hypervisor.fidelity weights must sum to a positive value".to_string(),
        });
    }
    Ok(HypervisorConfig {
        drift_enabled: raw.drift_enabled,
        drift_severity,
        streaming: StreamingDriftConfig {
            enabled: raw.streaming.enabled,
            window: raw.streaming.window.max(8),
            trees: raw.streaming.trees.max(1),
            depth: raw.streaming.depth.clamp(2, 16),
            threshold_medium: raw.streaming.threshold_medium,
            threshold_high: raw.streaming.threshold_high,
            threshold_critical: raw.streaming.threshold_critical,
        },
        stale_seconds: raw.stale_seconds.max(1),
        clear_retained_on_offline: raw.clear_retained_on_offline,
        allowed_write_patterns: raw.allowed_write_patterns,
        denied_write_patterns: raw.denied_write_patterns,
        validate_before_write: raw.validate_before_write,
        fidelity: FidelityConfig {
            weight_structural: f.weight_structural,
            weight_semantic: f.weight_semantic,
            weight_entropy: f.weight_entropy,
            alert_threshold: f.alert_threshold,
        },
    })
}

fn parse_mode(s: &str, path: &str) -> Result<PayloadMode, ConfigError> {
    match s {
        "inline" => Ok(PayloadMode::Inline),
        "pointer" => Ok(PayloadMode::Pointer),
        "hybrid" => Ok(PayloadMode::Hybrid),
        other => Err(ConfigError::Invalid {
            path: path.to_string(),
            message: format!("unknown payload mode '{}'", other),
        }),
    }
}

fn parse_leaf_kind(s: &str, path: &str) -> Result<LeafKind, ConfigError> {
    match s {
        "Property" => Ok(LeafKind::Property),
        "Range" => Ok(LeafKind::Range),
        "ReferenceElement" => Ok(LeafKind::ReferenceElement),
        "Entity" => Ok(LeafKind::Entity),
        "Relationship" => Ok(LeafKind::Relationship),
        "File" => Ok(LeafKind::File),
        "Blob" => Ok(LeafKind::Blob),
        other => Err(ConfigError::Invalid {
            path: path.to_string(),
            message: format!("unknown leaf kind '{}'", other),
        }),
    }
}

fn parse_drift_kind(s: &str, path: &str) -> Result<DriftEventKind, ConfigError> {
    match s {
        "metric_added" => Ok(DriftEventKind::MetricAdded),
        "metric_removed" => Ok(DriftEventKind::MetricRemoved),
        "type_changed" => Ok(DriftEventKind::TypeChanged),
        "value_anomaly" => Ok(DriftEventKind::ValueAnomaly),
        other => Err(ConfigError::Invalid {
            path: path.to_string(),
            message: format!("unknown drift event kind '{}'", other),
        }),
    }
}

fn parse_severity(s: &str, path: &str) -> Result<Severity, ConfigError> {
    match s {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        other => Err(ConfigError::Invalid {
            path: path.to_string(),
            message: format!("unknown severity '{}'", other),
        }),
    }
}
