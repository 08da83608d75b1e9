use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unsbridge_domain::{AssetLifecycle, LeafValue};

/// Bumped whenever a row layout changes incompatibly. The daemon refuses to
/// start against a database written by a different version.
pub const SCHEMA_VERSION: u64 = 1;

// ── Table identity ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Aliases,
    Births,
    Hashes,
    Fingerprints,
    Lifecycle,
    Context,
    Fidelity,
    DriftModel,
}

impl TableKind {
    pub const ALL: [TableKind; 8] = [
        TableKind::Aliases,
        TableKind::Births,
        TableKind::Hashes,
        TableKind::Fingerprints,
        TableKind::Lifecycle,
        TableKind::Context,
        TableKind::Fidelity,
        TableKind::DriftModel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TableKind::Aliases => "aliases",
            TableKind::Births => "births",
            TableKind::Hashes => "hashes",
            TableKind::Fingerprints => "fingerprints",
            TableKind::Lifecycle => "lifecycle",
            TableKind::Context => "context",
            TableKind::Fidelity => "fidelity",
            TableKind::DriftModel => "drift_model",
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-table entry caps. Exceeding a cap evicts the least-recently-touched
/// row on the next insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCaps {
    pub aliases: u64,
    pub births: u64,
    pub hashes: u64,
    pub fingerprints: u64,
    pub lifecycle: u64,
    pub context: u64,
    pub fidelity: u64,
    pub drift_model: u64,
}

impl Default for TableCaps {
    fn default() -> Self {
        TableCaps {
            aliases: 100_000,
            births: 10_000,
            hashes: 100_000,
            fingerprints: 10_000,
            lifecycle: 10_000,
            context: 50_000,
            fidelity: 50_000,
            drift_model: 10_000,
        }
    }
}

impl TableCaps {
    pub fn for_table(&self, table: TableKind) -> u64 {
        match table {
            TableKind::Aliases => self.aliases,
            TableKind::Births => self.births,
            TableKind::Hashes => self.hashes,
            TableKind::Fingerprints => self.fingerprints,
            TableKind::Lifecycle => self.lifecycle,
            TableKind::Context => self.context,
            TableKind::Fidelity => self.fidelity,
            TableKind::DriftModel => self.drift_model,
        }
    }
}

// ── Rows ──────────────────────────────────────────────────────────────────────

/// One metric as announced in the most recent DBIRTH of a device. The birth
/// cache row is the full set, so a rebirth never needs to retraverse AAS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthMetric {
    pub name: String,
    pub alias: u64,
    pub datatype: u32,
    pub value: LeafValue,
    pub timestamp_ms: i64,
    /// String properties announced with the metric (semanticId, unit).
    #[serde(default)]
    pub properties: Vec<(String, String)>,
}

/// Ordered `(path, valueType)` pairs of the most recent full snapshot of an
/// asset. Diffed against the next snapshot to detect schema drift.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub entries: Vec<FingerprintEntry>,
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub path: String,
    pub value_type: String,
}

/// Persisted hypervisor lifecycle state of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRow {
    pub state: AssetLifecycle,
    pub last_seen: DateTime<Utc>,
    pub last_transition: DateTime<Utc>,
}

/// Pointer-mode dictionary entry: the metadata bundle a short content hash
/// stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub semantic_id: Option<String>,
    pub unit: Option<String>,
    pub source: String,
    pub origin_uri: String,
}

/// One fidelity evaluation of one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FidelityRow {
    pub asset_uri: String,
    pub structural: f64,
    pub semantic: f64,
    pub entropy: f64,
    pub overall: f64,
    pub evaluated_at: DateTime<Utc>,
}
