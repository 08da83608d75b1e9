use std::collections::HashMap;
use std::path::PathBuf;

use unsbridge_domain::{DriftEventKind, LeafKind, Severity};

/// Fully validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub retained: RetainedConfig,
    pub lifecycle: LifecycleConfig,
    pub mapping: MappingConfig,
    pub watcher: WatcherConfig,
    pub repository: RepositoryConfig,
    pub state: StateConfig,
    pub observability: ObservabilityConfig,
    pub semantic: SemanticConfig,
    pub hypervisor: HypervisorConfig,
    pub daemon: DaemonConfig,
}

// ── Broker ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

/// Delivery guarantee requested for retained-plane publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_level(level: u8) -> Option<Qos> {
        Some(match level {
            0 => Qos::AtMostOnce,
            1 => Qos::AtLeastOnce,
            2 => Qos::ExactlyOnce,
            _ => return None,
        })
    }

    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

// ── Retained plane ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    Inline,
    Pointer,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct RetainedConfig {
    pub enabled: bool,
    /// Optional topic prefix, prepended when non-empty.
    pub prefix: String,
    pub qos: Qos,
    pub mode: PayloadMode,
    /// Attach semanticId/unit/originUri as publish headers where supported.
    pub enriched: bool,
    /// Context dictionary name used in pointer-mode topics.
    pub dictionary: String,
}

// ── Lifecycle plane ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub enabled: bool,
    pub group_id: String,
    pub edge_node_id: String,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
}

// ── Mapping ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AddressSpecConfig {
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
    pub asset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PatternRuleConfig {
    pub pattern: String,
    pub spec: AddressSpecConfig,
}

#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub assets: HashMap<String, AddressSpecConfig>,
    pub patterns: Vec<PatternRuleConfig>,
    pub default: AddressSpecConfig,
}

// ── Ingress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub paths: Vec<PathBuf>,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub base_url: Option<String>,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub write_retry_max: u32,
    pub write_retry_base_ms: u64,
}

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub dir: PathBuf,
    pub caps: TableCapsConfig,
}

#[derive(Debug, Clone)]
pub struct TableCapsConfig {
    pub aliases: u64,
    pub births: u64,
    pub hashes: u64,
    pub fingerprints: u64,
    pub lifecycle: u64,
    pub context: u64,
    pub fidelity: u64,
    pub drift_model: u64,
}

// ── Observability ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub listen: String,
    pub log_filter: String,
}

// ── Semantic validation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationLevel {
    Off,
    Warn,
    Enforce,
}

impl ValidationLevel {
    pub fn from_level(level: u8) -> Option<ValidationLevel> {
        Some(match level {
            0 => ValidationLevel::Off,
            1 => ValidationLevel::Warn,
            2 => ValidationLevel::Enforce,
            _ => return None,
        })
    }
}

/// Per-semantic-id value constraints.
#[derive(Debug, Clone, Default)]
pub struct SemanticConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub level: ValidationLevel,
    pub enforce_semantic_ids: bool,
    /// Leaf kinds that must carry a semantic id when enforcement is on.
    pub required_for_types: Vec<LeafKind>,
    /// Whether a Reject outcome drops the record or passes it with a warning.
    pub reject_invalid: bool,
    pub constraints: HashMap<String, SemanticConstraint>,
}

// ── Hypervisor ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamingDriftConfig {
    pub enabled: bool,
    pub window: usize,
    pub trees: usize,
    pub depth: usize,
    /// Anomaly-score bands, ascending.
    pub threshold_medium: f64,
    pub threshold_high: f64,
    pub threshold_critical: f64,
}

#[derive(Debug, Clone)]
pub struct FidelityConfig {
    pub weight_structural: f64,
    pub weight_semantic: f64,
    pub weight_entropy: f64,
    pub alert_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct HypervisorConfig {
    pub drift_enabled: bool,
    /// Overrides for the default kind→severity function.
    pub drift_severity: HashMap<DriftEventKind, Severity>,
    pub streaming: StreamingDriftConfig,
    pub stale_seconds: u64,
    pub clear_retained_on_offline: bool,
    pub allowed_write_patterns: Vec<String>,
    pub denied_write_patterns: Vec<String>,
    pub validate_before_write: bool,
    pub fidelity: FidelityConfig,
}

// ── Daemon ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Pipeline worker count; defaults to available parallelism, minimum 2.
    pub parallelism: usize,
    pub queue_depth: usize,
    pub shutdown_deadline_secs: u64,
}
