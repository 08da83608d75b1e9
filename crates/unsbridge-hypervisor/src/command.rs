use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};
use unsbridge_address::{parse_retained_topic, retained_topic, strip_cmd_suffix};
use unsbridge_domain::{AckPayload, AssetUri, CommandPayload, LeafKind, LeafRecord, LeafValue};

use crate::error::HypervisorError;
use crate::validate::Validator;

// ── Repository writer ────────────────────────────────────────────────────────

/// The AAS source of record, as far as the command path is concerned.
#[async_trait]
pub trait RepositoryWriter: Send + Sync + 'static {
    /// Write one leaf value back into the repository.
    async fn write_value(
        &self,
        submodel_id: &str,
        path: &[String],
        value: &serde_json::Value,
    ) -> Result<(), HypervisorError>;
}

/// REST writer against an AAS repository: `PATCH
/// {base}/submodels/{submodel}/submodel-elements/{idShortPath}/$value`.
pub struct HttpRepositoryWriter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRepositoryWriter {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, HypervisorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(HttpRepositoryWriter {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RepositoryWriter for HttpRepositoryWriter {
    async fn write_value(
        &self,
        submodel_id: &str,
        path: &[String],
        value: &serde_json::Value,
    ) -> Result<(), HypervisorError> {
        let url = format!(
            "{}/submodels/{}/submodel-elements/{}/$value",
            self.base_url.trim_end_matches('/'),
            submodel_id,
            path.join("."),
        );
        let response = self.client.patch(&url).json(value).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(HypervisorError::WriteRejected(format!(
                "{} returned {}",
                url,
                response.status()
            )))
        }
    }
}

// ── Leaf metadata index ──────────────────────────────────────────────────────

/// What the pipeline knew about a leaf the last time it flowed through.
/// Lets the command path validate a write against the leaf's semantics and
/// address the repository by the real submodel identifier.
#[derive(Debug, Clone)]
pub struct LeafMeta {
    pub asset_uri: AssetUri,
    pub submodel_id: String,
    pub semantic_id: Option<String>,
    pub unit: Option<String>,
    pub value_type: String,
    pub kind: LeafKind,
}

/// Read-mostly map from un-prefixed retained topic to leaf metadata,
/// written by the pipeline workers and read by the command handlers.
#[derive(Clone, Default)]
pub struct MetadataIndex {
    inner: Arc<RwLock<HashMap<String, LeafMeta>>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_leaf(&self, record: &LeafRecord, address: &unsbridge_domain::AssetAddress) {
        let key = retained_topic(None, address, &record.submodel_id_short, &record.path);
        let meta = LeafMeta {
            asset_uri: record.asset_uri.clone(),
            submodel_id: record.submodel_id.clone(),
            semantic_id: record.semantic_id.clone(),
            unit: record.unit.clone(),
            value_type: record.value_type.clone(),
            kind: record.kind,
        };
        self.inner.write().expect("metadata index poisoned").insert(key, meta);
    }

    pub fn get(&self, key: &str) -> Option<LeafMeta> {
        self.inner.read().expect("metadata index poisoned").get(key).cloned()
    }
}

// ── Command handling ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDisposition {
    Acked,
    Denied,
    Invalid,
    WriteFailed,
}

/// The ack (or nack) to publish on the command topic with `/cmd` removed.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub topic: String,
    pub payload: AckPayload,
    pub disposition: CommandDisposition,
}

/// Broker→AAS write mediation: pattern gates, optional pre-write
/// validation, serialized per-path writes with bounded retries.
pub struct CommandHandler {
    validator: Arc<Validator>,
    writer: Arc<dyn RepositoryWriter>,
    index: MetadataIndex,
    denied: Vec<(String, GlobMatcher)>,
    allowed: Vec<(String, GlobMatcher)>,
    validate_before_write: bool,
    retry_max: u32,
    retry_base: Duration,
    prefix: Option<String>,
    /// One lock per command path: at most one in-flight write per leaf,
    /// arrivals for the same leaf serialize in order.
    locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommandHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: Arc<Validator>,
        writer: Arc<dyn RepositoryWriter>,
        index: MetadataIndex,
        allowed_patterns: &[String],
        denied_patterns: &[String],
        validate_before_write: bool,
        retry_max: u32,
        retry_base_ms: u64,
        prefix: Option<String>,
    ) -> Result<Self, HypervisorError> {
        Ok(CommandHandler {
            validator,
            writer,
            index,
            denied: compile_patterns(denied_patterns)?,
            allowed: compile_patterns(allowed_patterns)?,
            validate_before_write,
            retry_max,
            retry_base: Duration::from_millis(retry_base_ms),
            prefix,
            locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Process one inbound message. Returns `None` when the topic is not a
    /// well-formed command topic (nothing to ack to).
    pub async fn handle(
        &self,
        topic: &str,
        payload: &[u8],
        now_ms: i64,
    ) -> Option<CommandOutcome> {
        let ack_topic = strip_cmd_suffix(topic)?.to_string();
        let parsed = match parse_retained_topic(self.prefix.as_deref(), &ack_topic) {
            Ok(p) => p,
            Err(e) => {
                debug!(topic, error = %e, "ignoring unmappable command topic");
                return None;
            }
        };

        let command: CommandPayload = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(topic, error = %e, "malformed command payload");
                return Some(CommandOutcome {
                    topic: ack_topic,
                    payload: AckPayload::nack("", "invalid"),
                    disposition: CommandDisposition::Invalid,
                });
            }
        };

        // Deny rules are consulted first; an allow rule must then match.
        let rel_path = format!("{}/{}", parsed.submodel_id_short, parsed.path.join("/"));
        if let Some((pattern, _)) = self.denied.iter().find(|(_, m)| m.is_match(&rel_path)) {
            debug!(topic, %pattern, "command denied");
            return Some(CommandOutcome {
                topic: ack_topic,
                payload: AckPayload::nack(command.correlation_id, "denied"),
                disposition: CommandDisposition::Denied,
            });
        }
        if !self.allowed.iter().any(|(_, m)| m.is_match(&rel_path)) {
            debug!(topic, "no allow rule matched");
            return Some(CommandOutcome {
                topic: ack_topic,
                payload: AckPayload::nack(command.correlation_id, "denied"),
                disposition: CommandDisposition::Denied,
            });
        }

        // Serialize per path; distinct paths proceed in parallel.
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(ack_topic.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let meta = self.index.get(&ack_topic);
        if self.validate_before_write {
            if let Some(meta) = &meta {
                if let Some(reason) = self.check_value(&command.value, meta, &parsed.path) {
                    warn!(topic, %reason, "command value failed validation");
                    return Some(CommandOutcome {
                        topic: ack_topic,
                        payload: AckPayload::nack(command.correlation_id, "invalid"),
                        disposition: CommandDisposition::Invalid,
                    });
                }
            }
        }

        let submodel_id = meta
            .as_ref()
            .map(|m| m.submodel_id.clone())
            .unwrap_or_else(|| parsed.submodel_id_short.clone());

        let mut attempt = 0;
        loop {
            match self
                .writer
                .write_value(&submodel_id, &parsed.path, &command.value)
                .await
            {
                Ok(()) => {
                    debug!(topic, "command written to repository");
                    return Some(CommandOutcome {
                        topic: ack_topic,
                        payload: AckPayload::ok(command.correlation_id, now_ms),
                        disposition: CommandDisposition::Acked,
                    });
                }
                // Transport failures retry with exponential backoff; a
                // repository rejection is final.
                Err(HypervisorError::Http(e)) if attempt < self.retry_max => {
                    attempt += 1;
                    let delay = self.retry_base * 2u32.saturating_pow(attempt - 1);
                    warn!(topic, attempt, error = %e, "repository write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(topic, error = %e, "repository write failed");
                    return Some(CommandOutcome {
                        topic: ack_topic,
                        payload: AckPayload::nack(command.correlation_id, "write_failed"),
                        disposition: CommandDisposition::WriteFailed,
                    });
                }
            }
        }
    }

    /// Re-run the semantic rules against the incoming value, using the
    /// metadata the leaf carried on its way out.
    fn check_value(
        &self,
        value: &serde_json::Value,
        meta: &LeafMeta,
        path: &[String],
    ) -> Option<String> {
        let leaf_value = match json_to_leaf(value) {
            Some(v) => v,
            None => return Some("value is not a scalar".to_string()),
        };
        let record = LeafRecord {
            asset_uri: meta.asset_uri.clone(),
            submodel_id: meta.submodel_id.clone(),
            submodel_id_short: String::new(),
            path: path.to_vec(),
            kind: meta.kind,
            value: leaf_value,
            value_type: meta.value_type.clone(),
            semantic_id: meta.semantic_id.clone(),
            unit: meta.unit.clone(),
            source_timestamp_ms: 0,
            origin_uri: String::new(),
        };
        match self.validator.validate(&record) {
            crate::validate::Outcome::Reject(reason) => Some(reason),
            _ => None,
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<(String, GlobMatcher)>, HypervisorError> {
    patterns
        .iter()
        .map(|pattern| {
            Glob::new(pattern)
                .map(|g| (pattern.clone(), g.compile_matcher()))
                .map_err(|source| HypervisorError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

fn json_to_leaf(value: &serde_json::Value) -> Option<LeafValue> {
    match value {
        serde_json::Value::Null => Some(LeafValue::Null),
        serde_json::Value::Bool(b) => Some(LeafValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(LeafValue::Int(i))
            } else {
                n.as_f64().map(LeafValue::Float)
            }
        }
        serde_json::Value::String(s) => Some(LeafValue::Text(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use unsbridge_config::{SemanticConfig, SemanticConstraint, ValidationLevel};
    use unsbridge_domain::AssetAddress;

    struct RecordingWriter {
        calls: StdMutex<Vec<(String, Vec<String>, serde_json::Value)>>,
        fail_times: StdMutex<u32>,
        reject: bool,
    }

    impl RecordingWriter {
        fn new() -> Self {
            RecordingWriter {
                calls: StdMutex::new(Vec::new()),
                fail_times: StdMutex::new(0),
                reject: false,
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>, serde_json::Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RepositoryWriter for RecordingWriter {
        async fn write_value(
            &self,
            submodel_id: &str,
            path: &[String],
            value: &serde_json::Value,
        ) -> Result<(), HypervisorError> {
            if self.reject {
                return Err(HypervisorError::WriteRejected("nope".into()));
            }
            let should_fail = {
                let mut failures = self.fail_times.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    true
                } else {
                    false
                }
            };
            if should_fail {
                // Shape a transport-level failure the retry loop recognizes.
                return Err(HypervisorError::Http(
                    reqwest::Client::new()
                        .get("http://127.0.0.1:1/unreachable")
                        .send()
                        .await
                        .unwrap_err(),
                ));
            }
            self.calls
                .lock()
                .unwrap()
                .push((submodel_id.to_string(), path.to_vec(), value.clone()));
            Ok(())
        }
    }

    fn semantic_config() -> SemanticConfig {
        let mut constraints = HashMap::new();
        constraints.insert(
            "target".to_string(),
            SemanticConstraint {
                min: Some(0.0),
                max: Some(100.0),
                ..Default::default()
            },
        );
        SemanticConfig {
            level: ValidationLevel::Enforce,
            enforce_semantic_ids: false,
            required_for_types: vec![],
            reject_invalid: true,
            constraints,
        }
    }

    fn handler(writer: Arc<RecordingWriter>) -> CommandHandler {
        let validator = Arc::new(Validator::new(semantic_config()).unwrap());
        let index = MetadataIndex::new();
        // The pipeline saw this leaf already.
        let record = LeafRecord {
            asset_uri: AssetUri::new("urn:acme:press-01"),
            submodel_id: "urn:sm:setpoints".into(),
            submodel_id_short: "Setpoints".into(),
            path: vec!["Target".into()],
            kind: LeafKind::Property,
            value: LeafValue::Float(50.0),
            value_type: "xs:double".into(),
            semantic_id: Some("target".into()),
            unit: None,
            source_timestamp_ms: 0,
            origin_uri: "file:///x".into(),
        };
        let address = AssetAddress::new("Acme", "Berlin", "Hall1", "L1", "Press01").unwrap();
        index.record_leaf(&record, &address);

        CommandHandler::new(
            validator,
            writer,
            index,
            &["Setpoints/*".to_string()],
            &["Identification/*".to_string()],
            true,
            2,
            1,
            None,
        )
        .unwrap()
    }

    const CMD_TOPIC: &str = "Acme/Berlin/Hall1/L1/Press01/context/Setpoints/Target/cmd";
    const DENIED_TOPIC: &str = "Acme/Berlin/Hall1/L1/Press01/context/Identification/Serial/cmd";

    fn command(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "value": value,
            "timestamp": 1_700_000_000_000i64,
            "correlation_id": "cmd-123",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn allowed_command_writes_and_acks() {
        let writer = Arc::new(RecordingWriter::new());
        let h = handler(writer.clone());

        let outcome = h
            .handle(CMD_TOPIC, &command(serde_json::json!(75.5)), 9_000)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::Acked);
        assert_eq!(
            outcome.topic,
            "Acme/Berlin/Hall1/L1/Press01/context/Setpoints/Target"
        );
        assert!(outcome.payload.ack);
        assert_eq!(outcome.payload.correlation_id, "cmd-123");
        assert_eq!(outcome.payload.timestamp, Some(9_000));

        let calls = writer.calls();
        assert_eq!(calls.len(), 1);
        // The repository is addressed by the real submodel id from the index.
        assert_eq!(calls[0].0, "urn:sm:setpoints");
        assert_eq!(calls[0].1, vec!["Target"]);
        assert_eq!(calls[0].2, serde_json::json!(75.5));
    }

    #[tokio::test]
    async fn denied_pattern_nacks_without_writing() {
        let writer = Arc::new(RecordingWriter::new());
        let h = handler(writer.clone());

        let outcome = h
            .handle(DENIED_TOPIC, &command(serde_json::json!("X")), 0)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::Denied);
        assert!(!outcome.payload.ack);
        assert_eq!(outcome.payload.error.as_deref(), Some("denied"));
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn unlisted_path_is_denied_by_default() {
        let writer = Arc::new(RecordingWriter::new());
        let h = handler(writer.clone());
        let topic = "Acme/Berlin/Hall1/L1/Press01/context/Other/Thing/cmd";
        let outcome = h.handle(topic, &command(serde_json::json!(1)), 0).await.unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::Denied);
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_value_is_invalid() {
        let writer = Arc::new(RecordingWriter::new());
        let h = handler(writer.clone());
        let outcome = h
            .handle(CMD_TOPIC, &command(serde_json::json!(500.0)), 0)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::Invalid);
        assert_eq!(outcome.payload.error.as_deref(), Some("invalid"));
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid() {
        let writer = Arc::new(RecordingWriter::new());
        let h = handler(writer);
        let outcome = h.handle(CMD_TOPIC, b"not json", 0).await.unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::Invalid);
    }

    #[tokio::test]
    async fn non_command_topic_is_ignored() {
        let writer = Arc::new(RecordingWriter::new());
        let h = handler(writer);
        assert!(h
            .handle(
                "Acme/Berlin/Hall1/L1/Press01/context/Setpoints/Target",
                &command(serde_json::json!(1)),
                0
            )
            .await
            .is_none());
    }

    #[tokio::test]
    async fn transport_failure_retries_then_succeeds() {
        let writer = Arc::new(RecordingWriter::new());
        *writer.fail_times.lock().unwrap() = 2;
        let h = handler(writer.clone());
        let outcome = h
            .handle(CMD_TOPIC, &command(serde_json::json!(10.0)), 0)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::Acked);
        assert_eq!(writer.calls().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_nack_write_failed() {
        let writer = Arc::new(RecordingWriter::new());
        *writer.fail_times.lock().unwrap() = 10;
        let h = handler(writer.clone());
        let outcome = h
            .handle(CMD_TOPIC, &command(serde_json::json!(10.0)), 0)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::WriteFailed);
        assert_eq!(outcome.payload.error.as_deref(), Some("write_failed"));
    }

    #[tokio::test]
    async fn http_writer_patches_value_endpoint() {
        use wiremock::matchers::{body_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(
                "/submodels/urn:sm:setpoints/submodel-elements/Target/$value",
            ))
            .and(body_json(serde_json::json!(75.5)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let writer = HttpRepositoryWriter::new(server.uri(), 5).unwrap();
        writer
            .write_value(
                "urn:sm:setpoints",
                &["Target".to_string()],
                &serde_json::json!(75.5),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn http_writer_surfaces_rejection() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let writer = HttpRepositoryWriter::new(server.uri(), 5).unwrap();
        let err = writer
            .write_value("sm", &["X".to_string()], &serde_json::json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::WriteRejected(_)));
    }

    #[tokio::test]
    async fn repository_rejection_is_final() {
        let mut writer = RecordingWriter::new();
        writer.reject = true;
        let h = handler(Arc::new(writer));
        let outcome = h
            .handle(CMD_TOPIC, &command(serde_json::json!(10.0)), 0)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, CommandDisposition::WriteFailed);
    }
}
