use prost::Message;
use unsbridge_domain::LeafValue;

use crate::datatype::DataType;
use crate::error::CodecError;

/// Metric name carrying the session number in NBIRTH/NDEATH.
pub const BD_SEQ_METRIC: &str = "bdSeq";
/// Node-control metric announced in NBIRTH; hosts write `true` to request a rebirth.
pub const REBIRTH_METRIC: &str = "Node Control/Rebirth";

// ── Message kinds ────────────────────────────────────────────────────────────

/// The verb segment of a lifecycle-plane topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NBirth,
    NDeath,
    NData,
    NCmd,
    DBirth,
    DDeath,
    DData,
    DCmd,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::NBirth => "NBIRTH",
            MessageKind::NDeath => "NDEATH",
            MessageKind::NData => "NDATA",
            MessageKind::NCmd => "NCMD",
            MessageKind::DBirth => "DBIRTH",
            MessageKind::DDeath => "DDEATH",
            MessageKind::DData => "DDATA",
            MessageKind::DCmd => "DCMD",
        }
    }

    pub fn parse(s: &str) -> Option<MessageKind> {
        Some(match s {
            "NBIRTH" => MessageKind::NBirth,
            "NDEATH" => MessageKind::NDeath,
            "NDATA" => MessageKind::NData,
            "NCMD" => MessageKind::NCmd,
            "DBIRTH" => MessageKind::DBirth,
            "DDEATH" => MessageKind::DDeath,
            "DDATA" => MessageKind::DData,
            "DCMD" => MessageKind::DCmd,
            _ => return None,
        })
    }

    /// Whether this kind addresses a device (carries a deviceId topic segment).
    pub fn is_device_scoped(self) -> bool {
        matches!(
            self,
            MessageKind::DBirth | MessageKind::DDeath | MessageKind::DData | MessageKind::DCmd
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Wire messages ────────────────────────────────────────────────────────────

/// Envelope of every lifecycle-plane message.
#[derive(Clone, PartialEq, Message)]
pub struct SparkplugPayload {
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: Option<u64>,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
    #[prost(uint64, optional, tag = "3")]
    pub seq: Option<u64>,
    #[prost(string, optional, tag = "4")]
    pub uuid: Option<String>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metric {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub alias: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "4")]
    pub datatype: Option<u32>,
    #[prost(bool, optional, tag = "7")]
    pub is_null: Option<bool>,
    #[prost(message, optional, tag = "9")]
    pub properties: Option<PropertySet>,
    #[prost(oneof = "MetricValue", tags = "10, 11, 12, 13, 14, 15, 16")]
    pub value: Option<MetricValue>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum MetricValue {
    #[prost(uint32, tag = "10")]
    Int(u32),
    #[prost(uint64, tag = "11")]
    Long(u64),
    #[prost(float, tag = "12")]
    Float(f32),
    #[prost(double, tag = "13")]
    Double(f64),
    #[prost(bool, tag = "14")]
    Boolean(bool),
    #[prost(string, tag = "15")]
    String(String),
    #[prost(bytes, tag = "16")]
    Bytes(Vec<u8>),
}

#[derive(Clone, PartialEq, Message)]
pub struct PropertySet {
    #[prost(string, repeated, tag = "1")]
    pub keys: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub values: Vec<PropertyValue>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PropertyValue {
    #[prost(uint32, optional, tag = "1")]
    pub datatype: Option<u32>,
    #[prost(bool, optional, tag = "2")]
    pub is_null: Option<bool>,
    #[prost(oneof = "PropertyValueKind", tags = "3, 4, 5, 6, 7, 8")]
    pub value: Option<PropertyValueKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum PropertyValueKind {
    #[prost(uint32, tag = "3")]
    Int(u32),
    #[prost(uint64, tag = "4")]
    Long(u64),
    #[prost(float, tag = "5")]
    Float(f32),
    #[prost(double, tag = "6")]
    Double(f64),
    #[prost(bool, tag = "7")]
    Boolean(bool),
    #[prost(string, tag = "8")]
    String(String),
}

// ── Construction ─────────────────────────────────────────────────────────────

impl SparkplugPayload {
    pub fn new(timestamp_ms: i64, seq: u8) -> Self {
        SparkplugPayload {
            timestamp: Some(timestamp_ms as u64),
            metrics: Vec::new(),
            seq: Some(seq as u64),
            uuid: None,
            body: None,
        }
    }

    pub fn with_metrics(timestamp_ms: i64, seq: u8, metrics: Vec<Metric>) -> Self {
        let mut p = Self::new(timestamp_ms, seq);
        p.metrics = metrics;
        p
    }

    pub fn encode_to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn decode_from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(SparkplugPayload::decode(buf)?)
    }

    /// The `bdSeq` metric value, when this payload carries one.
    pub fn bd_seq(&self) -> Option<u64> {
        self.metrics
            .iter()
            .find(|m| m.name.as_deref() == Some(BD_SEQ_METRIC))
            .and_then(|m| match m.value {
                Some(MetricValue::Long(v)) => Some(v),
                Some(MetricValue::Int(v)) => Some(v as u64),
                _ => None,
            })
    }

    /// Whether this payload asks the node to rebirth.
    pub fn requests_rebirth(&self) -> bool {
        self.metrics.iter().any(|m| {
            m.name.as_deref() == Some(REBIRTH_METRIC)
                && matches!(m.value, Some(MetricValue::Boolean(true)))
        })
    }
}

impl Metric {
    /// Named metric carrying a leaf value, for birth messages.
    pub fn named(
        name: impl Into<String>,
        alias: u64,
        timestamp_ms: i64,
        datatype: DataType,
        value: &LeafValue,
    ) -> Self {
        let (wire, is_null) = metric_value(value);
        Metric {
            name: Some(name.into()),
            alias: Some(alias),
            timestamp: Some(timestamp_ms as u64),
            datatype: Some(datatype.as_u32()),
            is_null,
            properties: None,
            value: wire,
        }
    }

    /// Alias-only metric, for data messages after the alias was announced.
    pub fn aliased(alias: u64, timestamp_ms: i64, datatype: DataType, value: &LeafValue) -> Self {
        let (wire, is_null) = metric_value(value);
        Metric {
            name: None,
            alias: Some(alias),
            timestamp: Some(timestamp_ms as u64),
            datatype: Some(datatype.as_u32()),
            is_null,
            properties: None,
            value: wire,
        }
    }

    /// The session-number metric carried by NBIRTH and NDEATH.
    /// Transmitted modulo 256 per the protocol's 8-bit wire width.
    pub fn bd_seq(value: u64, timestamp_ms: i64) -> Self {
        Metric {
            name: Some(BD_SEQ_METRIC.to_string()),
            alias: None,
            timestamp: Some(timestamp_ms as u64),
            datatype: Some(DataType::Int64.as_u32()),
            is_null: None,
            properties: None,
            value: Some(MetricValue::Long(value % 256)),
        }
    }

    /// The rebirth node-control metric announced in NBIRTH.
    pub fn rebirth_control(timestamp_ms: i64) -> Self {
        Metric {
            name: Some(REBIRTH_METRIC.to_string()),
            alias: None,
            timestamp: Some(timestamp_ms as u64),
            datatype: Some(DataType::Boolean.as_u32()),
            is_null: None,
            properties: None,
            value: Some(MetricValue::Boolean(false)),
        }
    }

    /// Attach string properties (enriched mode: semanticId, unit, originUri).
    pub fn with_properties<'a>(
        mut self,
        props: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut set = PropertySet::default();
        for (k, v) in props {
            set.keys.push(k.to_string());
            set.values.push(PropertyValue {
                datatype: Some(DataType::String.as_u32()),
                is_null: None,
                value: Some(PropertyValueKind::String(v.to_string())),
            });
        }
        if !set.keys.is_empty() {
            self.properties = Some(set);
        }
        self
    }

    /// Decode the wire value back into the domain union.
    pub fn leaf_value(&self) -> LeafValue {
        if self.is_null == Some(true) {
            return LeafValue::Null;
        }
        match &self.value {
            None => LeafValue::Null,
            Some(MetricValue::Int(v)) => LeafValue::Int(*v as i64),
            Some(MetricValue::Long(v)) => LeafValue::Int(*v as i64),
            Some(MetricValue::Float(v)) => LeafValue::Float(*v as f64),
            Some(MetricValue::Double(v)) => LeafValue::Float(*v),
            Some(MetricValue::Boolean(v)) => LeafValue::Bool(*v),
            Some(MetricValue::String(v)) => LeafValue::Text(v.clone()),
            Some(MetricValue::Bytes(v)) => LeafValue::Bytes(v.clone()),
        }
    }
}

/// Signed integers ride the unsigned wire fields via two's-complement cast,
/// the same convention the reference Sparkplug implementations use.
fn metric_value(value: &LeafValue) -> (Option<MetricValue>, Option<bool>) {
    match value {
        LeafValue::Null => (None, Some(true)),
        LeafValue::Bool(b) => (Some(MetricValue::Boolean(*b)), None),
        LeafValue::Int(i) => (Some(MetricValue::Long(*i as u64)), None),
        LeafValue::Float(f) => (Some(MetricValue::Double(*f)), None),
        LeafValue::Text(s) => (Some(MetricValue::String(s.clone())), None),
        LeafValue::Bytes(b) => (Some(MetricValue::Bytes(b.clone())), None),
    }
}
