use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Globally unique identifier of an asset (usually an IRI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetUri(pub String);

impl AssetUri {
    pub fn new(s: impl Into<String>) -> Self {
        AssetUri(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the URI with topic-unsafe characters stripped.
    /// Used as the default `asset` segment when no mapping names one.
    pub fn short_name(&self) -> String {
        let tail = self
            .0
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(&self.0);
        let cleaned: String = tail
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if cleaned.is_empty() {
            "asset".to_string()
        } else {
            cleaned
        }
    }
}

impl std::fmt::Display for AssetUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Leaf records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    Property,
    Range,
    ReferenceElement,
    Entity,
    Relationship,
    File,
    Blob,
}

impl std::fmt::Display for LeafKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LeafKind::Property => "Property",
            LeafKind::Range => "Range",
            LeafKind::ReferenceElement => "ReferenceElement",
            LeafKind::Entity => "Entity",
            LeafKind::Relationship => "Relationship",
            LeafKind::File => "File",
            LeafKind::Blob => "Blob",
        };
        write!(f, "{}", s)
    }
}

/// Tagged union over every value a leaf can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl LeafValue {
    pub fn is_null(&self) -> bool {
        matches!(self, LeafValue::Null)
    }

    /// Numeric view for validation and drift scoring.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LeafValue::Int(i) => Some(*i as f64),
            LeafValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            LeafValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering used by the retained-plane payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            LeafValue::Null => serde_json::Value::Null,
            LeafValue::Bool(b) => serde_json::Value::Bool(*b),
            LeafValue::Int(i) => serde_json::json!(i),
            LeafValue::Float(f) => serde_json::json!(f),
            LeafValue::Text(s) => serde_json::Value::String(s.clone()),
            // Bytes surface as lowercase hex; raw blobs are never forwarded.
            LeafValue::Bytes(b) => {
                serde_json::Value::String(b.iter().map(|x| format!("{:02x}", x)).collect())
            }
        }
    }
}

/// One observable leaf of an AAS submodel, as emitted by traversal.
///
/// `(asset_uri, submodel_id, path)` is unique within one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub asset_uri: AssetUri,
    pub submodel_id: String,
    /// Human-readable short name of the submodel; used in topic composition.
    pub submodel_id_short: String,
    /// Navigation from submodel root to leaf. Never empty.
    pub path: Vec<String>,
    pub kind: LeafKind,
    pub value: LeafValue,
    /// XSD-style primitive type name, e.g. `xs:double`.
    pub value_type: String,
    pub semantic_id: Option<String>,
    pub unit: Option<String>,
    /// Milliseconds since epoch.
    pub source_timestamp_ms: i64,
    /// Where this leaf came from: file path or repository URL.
    pub origin_uri: String,
}

impl LeafRecord {
    /// Metric name on the lifecycle plane: `{submodelIdShort}/{path…}`.
    pub fn metric_name(&self) -> String {
        let mut name = self.submodel_id_short.clone();
        for seg in &self.path {
            name.push('/');
            name.push_str(seg);
        }
        name
    }
}

// ── Asset address ─────────────────────────────────────────────────────────────

/// Five-level industrial-hierarchy location of an asset.
///
/// Segments are topic-safe: non-empty, no `/`, `+` or `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetAddress {
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
    pub asset: String,
}

impl AssetAddress {
    pub fn new(
        enterprise: impl Into<String>,
        site: impl Into<String>,
        area: impl Into<String>,
        line: impl Into<String>,
        asset: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let addr = AssetAddress {
            enterprise: enterprise.into(),
            site: site.into(),
            area: area.into(),
            line: line.into(),
            asset: asset.into(),
        };
        addr.validate()?;
        Ok(addr)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for (name, seg) in self.segments() {
            if seg.is_empty() {
                return Err(DomainError::EmptyAddressSegment { segment: name });
            }
            if seg.contains(['/', '+', '#']) {
                return Err(DomainError::UnsafeAddressSegment {
                    segment: name,
                    value: seg.to_string(),
                });
            }
        }
        Ok(())
    }

    fn segments(&self) -> [(&'static str, &str); 5] {
        [
            ("enterprise", &self.enterprise),
            ("site", &self.site),
            ("area", &self.area),
            ("line", &self.line),
            ("asset", &self.asset),
        ]
    }
}

impl std::fmt::Display for AssetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.enterprise, self.site, self.area, self.line, self.asset
        )
    }
}
