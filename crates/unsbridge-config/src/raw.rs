use serde::Deserialize;
use std::collections::HashMap;

/// Raw YAML representation of the daemon config document.
///
/// Every struct rejects unknown keys so a typo'd option fails at load time
/// instead of silently doing nothing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub broker: RawBroker,
    #[serde(default)]
    pub retained: RawRetained,
    pub lifecycle: RawLifecycle,
    pub mapping: RawMapping,
    #[serde(default)]
    pub watcher: RawWatcher,
    #[serde(default)]
    pub repository: RawRepository,
    pub state: RawState,
    #[serde(default)]
    pub observability: RawObservability,
    #[serde(default)]
    pub semantic: RawSemantic,
    #[serde(default)]
    pub hypervisor: RawHypervisor,
    #[serde(default)]
    pub daemon: RawDaemon,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBroker {
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "unsbridge".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRetained {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub prefix: String,
    /// 0, 1 or 2.
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// "inline", "pointer" or "hybrid".
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub enriched: bool,
    #[serde(default = "default_dictionary")]
    pub dictionary: String,
}

impl Default for RawRetained {
    fn default() -> Self {
        RawRetained {
            enabled: true,
            prefix: String::new(),
            qos: default_qos(),
            mode: default_mode(),
            enriched: false,
            dictionary: default_dictionary(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_mode() -> String {
    "inline".to_string()
}

fn default_dictionary() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLifecycle {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub group_id: String,
    pub edge_node_id: String,
    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

fn default_reconnect_min() -> u64 {
    1
}

fn default_reconnect_max() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAddressSpec {
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
    pub asset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPatternRule {
    pub pattern: String,
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
    pub asset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMapping {
    #[serde(default)]
    pub assets: HashMap<String, RawAddressSpec>,
    #[serde(default)]
    pub patterns: Vec<RawPatternRule>,
    pub default: RawAddressSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawWatcher {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default = "default_watch_interval")]
    pub poll_interval_secs: u64,
}

impl Default for RawWatcher {
    fn default() -> Self {
        RawWatcher {
            paths: Vec::new(),
            poll_interval_secs: default_watch_interval(),
        }
    }
}

fn default_watch_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRepository {
    pub base_url: Option<String>,
    #[serde(default = "default_repo_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_repo_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_write_retry_max")]
    pub write_retry_max: u32,
    #[serde(default = "default_write_retry_base")]
    pub write_retry_base_ms: u64,
}

impl Default for RawRepository {
    fn default() -> Self {
        RawRepository {
            base_url: None,
            poll_interval_secs: default_repo_poll(),
            timeout_secs: default_repo_timeout(),
            write_retry_max: default_write_retry_max(),
            write_retry_base_ms: default_write_retry_base(),
        }
    }
}

fn default_repo_poll() -> u64 {
    60
}

fn default_repo_timeout() -> u64 {
    30
}

fn default_write_retry_max() -> u32 {
    3
}

fn default_write_retry_base() -> u64 {
    250
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawState {
    pub dir: String,
    #[serde(default)]
    pub caps: RawTableCaps,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTableCaps {
    #[serde(default = "default_cap_large")]
    pub aliases: u64,
    #[serde(default = "default_cap_small")]
    pub births: u64,
    #[serde(default = "default_cap_large")]
    pub hashes: u64,
    #[serde(default = "default_cap_small")]
    pub fingerprints: u64,
    #[serde(default = "default_cap_small")]
    pub lifecycle: u64,
    #[serde(default = "default_cap_medium")]
    pub context: u64,
    #[serde(default = "default_cap_medium")]
    pub fidelity: u64,
    #[serde(default = "default_cap_small")]
    pub drift_model: u64,
}

impl Default for RawTableCaps {
    fn default() -> Self {
        RawTableCaps {
            aliases: default_cap_large(),
            births: default_cap_small(),
            hashes: default_cap_large(),
            fingerprints: default_cap_small(),
            lifecycle: default_cap_small(),
            context: default_cap_medium(),
            fidelity: default_cap_medium(),
            drift_model: default_cap_small(),
        }
    }
}

fn default_cap_large() -> u64 {
    100_000
}

fn default_cap_medium() -> u64 {
    50_000
}

fn default_cap_small() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawObservability {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for RawObservability {
    fn default() -> Self {
        RawObservability {
            listen: default_listen(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSemantic {
    /// 0 = off, 1 = warn, 2 = enforce.
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub enforce_semantic_ids: bool,
    /// Leaf kind names, e.g. "Property".
    #[serde(default)]
    pub required_for_types: Vec<String>,
    #[serde(default)]
    pub reject_invalid: bool,
    #[serde(default)]
    pub constraints: HashMap<String, RawConstraint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStreaming {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_trees")]
    pub trees: usize,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_threshold_medium")]
    pub threshold_medium: f64,
    #[serde(default = "default_threshold_high")]
    pub threshold_high: f64,
    #[serde(default = "default_threshold_critical")]
    pub threshold_critical: f64,
}

impl Default for RawStreaming {
    fn default() -> Self {
        RawStreaming {
            enabled: false,
            window: default_window(),
            trees: default_trees(),
            depth: default_depth(),
            threshold_medium: default_threshold_medium(),
            threshold_high: default_threshold_high(),
            threshold_critical: default_threshold_critical(),
        }
    }
}

fn default_window() -> usize {
    256
}

fn default_trees() -> usize {
    25
}

fn default_depth() -> usize {
    8
}

fn default_threshold_medium() -> f64 {
    0.7
}

fn default_threshold_high() -> f64 {
    0.85
}

fn default_threshold_critical() -> f64 {
    0.95
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFidelity {
    #[serde(default = "default_weight_structural")]
    pub weight_structural: f64,
    #[serde(default = "default_weight_semantic")]
    pub weight_semantic: f64,
    #[serde(default = "default_weight_entropy")]
    pub weight_entropy: f64,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

impl Default for RawFidelity {
    fn default() -> Self {
        RawFidelity {
            weight_structural: default_weight_structural(),
            weight_semantic: default_weight_semantic(),
            weight_entropy: default_weight_entropy(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

fn default_weight_structural() -> f64 {
    0.5
}

fn default_weight_semantic() -> f64 {
    0.3
}

fn default_weight_entropy() -> f64 {
    0.2
}

fn default_alert_threshold() -> f64 {
    0.8
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawHypervisor {
    #[serde(default = "default_true")]
    pub drift_enabled: bool,
    /// Overrides of the kind→severity defaults, e.g. `metric_added: medium`.
    #[serde(default)]
    pub drift_severity: HashMap<String, String>,
    #[serde(default)]
    pub streaming: RawStreaming,
    #[serde(default = "default_stale_seconds")]
    pub stale_seconds: u64,
    #[serde(default)]
    pub clear_retained_on_offline: bool,
    #[serde(default)]
    pub allowed_write_patterns: Vec<String>,
    #[serde(default)]
    pub denied_write_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub validate_before_write: bool,
    #[serde(default)]
    pub fidelity: RawFidelity,
}

impl Default for RawHypervisor {
    fn default() -> Self {
        RawHypervisor {
            drift_enabled: true,
            drift_severity: HashMap::new(),
            streaming: RawStreaming::default(),
            stale_seconds: default_stale_seconds(),
            clear_retained_on_offline: false,
            allowed_write_patterns: Vec::new(),
            denied_write_patterns: Vec::new(),
            validate_before_write: true,
            fidelity: RawFidelity::default(),
        }
    }
}

fn default_stale_seconds() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDaemon {
    /// 0 = use available hardware parallelism.
    #[serde(default)]
    pub parallelism: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_shutdown_deadline")]
    pub shutdown_deadline_secs: u64,
}

impl Default for RawDaemon {
    fn default() -> Self {
        RawDaemon {
            parallelism: 0,
            queue_depth: default_queue_depth(),
            shutdown_deadline_secs: default_shutdown_deadline(),
        }
    }
}

fn default_queue_depth() -> usize {
    64
}

fn default_shutdown_deadline() -> u64 {
    30
}
