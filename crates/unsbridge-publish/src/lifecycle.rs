use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use unsbridge_address::lifecycle_topic;
use unsbridge_broker::{BrokerClient, LastWill};
use unsbridge_codec::{DataType, MessageKind, Metric, SparkplugPayload};
use unsbridge_config::LifecycleConfig;
use unsbridge_domain::{LeafRecord, LeafValue};
use unsbridge_store::{BirthMetric, StateStore};

use crate::error::PublishError;

/// One metric observation headed for the lifecycle plane.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub datatype: DataType,
    pub value: LeafValue,
    pub timestamp_ms: i64,
    /// String properties announced with the metric in DBIRTH
    /// (semanticId, unit and the like).
    pub properties: Vec<(String, String)>,
}

impl MetricSample {
    pub fn from_leaf(record: &LeafRecord) -> Self {
        let mut properties = Vec::new();
        if let Some(semantic_id) = &record.semantic_id {
            properties.push(("semanticId".to_string(), semantic_id.clone()));
        }
        if let Some(unit) = &record.unit {
            properties.push(("unit".to_string(), unit.clone()));
        }
        MetricSample {
            name: record.metric_name(),
            datatype: DataType::from_xsd(&record.value_type, &record.value),
            value: record.value.clone(),
            timestamp_ms: record.source_timestamp_ms,
            properties,
        }
    }
}

/// In-memory session numbering and membership. Reset on every reconnect.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Unwrapped 64-bit session counter; transmitted modulo 256.
    pub bd_seq: u64,
    /// Wrapping 8-bit message counter.
    pub seq: u8,
    pub online: bool,
    /// Devices with a live DBIRTH in this session.
    pub devices: BTreeSet<String>,
}

/// The lifecycle-plane state machine.
///
/// Owns `seq` and is the single writer of the alias table, the birth cache
/// and the persisted session counter; everything runs on the broker I/O
/// worker, which guarantees on-wire ordering matches call ordering.
pub struct LifecycleEngine {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn StateStore>,
    config: LifecycleConfig,
    session: SessionState,
    /// Last value seen per (device, metric), for change detection.
    last_values: HashMap<String, HashMap<String, LeafValue>>,
    /// Samples buffered while a DBIRTH could not be made durable.
    pending: HashMap<String, Vec<MetricSample>>,
}

impl LifecycleEngine {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn StateStore>,
        config: LifecycleConfig,
    ) -> Self {
        LifecycleEngine {
            broker,
            store,
            config,
            session: SessionState::default(),
            last_values: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Topic the node listens on for rebirth commands.
    pub fn command_topic(&self) -> String {
        lifecycle_topic(
            &self.config.group_id,
            MessageKind::NCmd,
            &self.config.edge_node_id,
            None,
        )
    }

    /// Build the NDEATH last-will for the next session. Must be called
    /// before `connect` so NBIRTH and NDEATH carry the same `bdSeq`.
    pub async fn prepare_will(&mut self, timestamp_ms: i64) -> Result<LastWill, PublishError> {
        let bd_seq = self.store.load_bd_seq().await?;
        let payload = SparkplugPayload {
            timestamp: Some(timestamp_ms as u64),
            metrics: vec![Metric::bd_seq(bd_seq, timestamp_ms)],
            seq: None,
            uuid: None,
            body: None,
        };
        Ok(LastWill {
            topic: lifecycle_topic(
                &self.config.group_id,
                MessageKind::NDeath,
                &self.config.edge_node_id,
                None,
            ),
            payload: payload.encode_to_bytes(),
            qos: 0,
            retain: false,
        })
    }

    /// Open the session after the transport connected: NBIRTH, command
    /// subscription, and a DBIRTH replay for every device in the birth
    /// cache (survivors of an ungraceful previous session).
    pub async fn establish(&mut self, timestamp_ms: i64) -> Result<(), PublishError> {
        let bd_seq = self.store.load_bd_seq().await?;
        self.session = SessionState {
            bd_seq,
            seq: 0,
            online: false,
            devices: BTreeSet::new(),
        };

        let nbirth = vec![
            Metric::bd_seq(bd_seq, timestamp_ms),
            Metric::rebirth_control(timestamp_ms),
        ];
        self.publish_message(MessageKind::NBirth, None, nbirth, timestamp_ms)
            .await?;
        // The next session uses the successor value; committed only after
        // NBIRTH went out so a failed connect attempt does not burn one.
        self.store.store_bd_seq(bd_seq + 1).await?;

        self.broker.subscribe(&self.command_topic(), 0).await?;
        self.session.online = true;
        info!(bd_seq, "lifecycle session established");

        let mut cached = self.store.list_births(&self.config.edge_node_id).await?;
        cached.sort_by(|a, b| a.0.cmp(&b.0));
        for (device, metrics) in cached {
            self.publish_cached_birth(&device, &metrics, timestamp_ms).await?;
        }
        Ok(())
    }

    /// Mark the session dead after a transport drop. The birth cache stays,
    /// so `establish` can replay device births on reconnect.
    pub fn on_disconnect(&mut self) {
        if self.session.online {
            warn!("lifecycle session lost");
        }
        self.session.online = false;
        self.session.devices.clear();
        self.last_values.clear();
    }

    /// Feed one device's samples through the birth/data state machine.
    pub async fn handle_samples(
        &mut self,
        device: &str,
        samples: Vec<MetricSample>,
        timestamp_ms: i64,
    ) -> Result<(), PublishError> {
        let samples = self.merge_pending(device, samples);
        if samples.is_empty() {
            return Ok(());
        }
        if !self.session.online {
            self.pending.insert(device.to_string(), samples);
            return Ok(());
        }

        if !self.session.devices.contains(device) {
            return self.birth_device(device, samples, timestamp_ms).await;
        }

        // A metric outside the announced set forces a fresh DBIRTH; aliases
        // may only be used after the most recent birth announced them.
        let known = self.last_values.entry(device.to_string()).or_default();
        if samples.iter().any(|s| !known.contains_key(&s.name)) {
            let cached = self
                .store
                .get_birth(&self.config.edge_node_id, device)
                .await?
                .unwrap_or_default();
            let mut merged: Vec<MetricSample> = cached
                .iter()
                .map(|row| MetricSample {
                    name: row.name.clone(),
                    datatype: DataType::from_u32(row.datatype)
                        .unwrap_or(DataType::of_value(&row.value)),
                    value: known.get(&row.name).cloned().unwrap_or_else(|| row.value.clone()),
                    timestamp_ms,
                    properties: row.properties.clone(),
                })
                .collect();
            merged.retain(|m| !samples.iter().any(|s| s.name == m.name));
            merged.extend(samples);
            merged.sort_by(|a, b| a.name.cmp(&b.name));
            self.session.devices.remove(device);
            return self.birth_device(device, merged, timestamp_ms).await;
        }

        let changed: Vec<&MetricSample> = samples
            .iter()
            .filter(|s| known.get(&s.name) != Some(&s.value))
            .collect();
        if changed.is_empty() {
            return Ok(());
        }

        let mut metrics = Vec::with_capacity(changed.len());
        for sample in &changed {
            let Some(alias) = self
                .store
                .get_alias(&self.config.edge_node_id, device, &sample.name)
                .await?
            else {
                // Known value but no alias row: only possible after an alias
                // eviction. The metric rejoins at the next rebirth.
                warn!(device, metric = %sample.name, "no alias for known metric, dropping");
                continue;
            };
            metrics.push(Metric::aliased(
                alias,
                sample.timestamp_ms,
                sample.datatype,
                &sample.value,
            ));
        }
        if metrics.is_empty() {
            return Ok(());
        }
        for sample in &changed {
            known.insert(sample.name.clone(), sample.value.clone());
        }
        self.publish_message(MessageKind::DData, Some(device), metrics, timestamp_ms)
            .await
    }

    /// Announce a device: allocate aliases, persist the birth cache, then
    /// publish the DBIRTH carrying every known metric. Data never precedes
    /// a durable birth; on store failure the samples are buffered.
    async fn birth_device(
        &mut self,
        device: &str,
        samples: Vec<MetricSample>,
        timestamp_ms: i64,
    ) -> Result<(), PublishError> {
        let mut rows = Vec::with_capacity(samples.len());
        for sample in &samples {
            let alias = match self
                .store
                .allocate_alias(&self.config.edge_node_id, device, &sample.name)
                .await
            {
                Ok(alias) => alias,
                Err(e) => {
                    warn!(device, error = %e, "alias allocation failed, buffering samples");
                    self.pending.insert(device.to_string(), samples);
                    return Err(e.into());
                }
            };
            rows.push(BirthMetric {
                name: sample.name.clone(),
                alias,
                datatype: sample.datatype.as_u32(),
                value: sample.value.clone(),
                timestamp_ms: sample.timestamp_ms,
                properties: sample.properties.clone(),
            });
        }
        if let Err(e) = self
            .store
            .put_birth(&self.config.edge_node_id, device, &rows)
            .await
        {
            warn!(device, error = %e, "birth cache write failed, buffering samples");
            self.pending.insert(device.to_string(), samples);
            return Err(e.into());
        }

        let metrics = rows.iter().map(birth_wire_metric).collect();
        self.publish_message(MessageKind::DBirth, Some(device), metrics, timestamp_ms)
            .await?;

        self.session.devices.insert(device.to_string());
        self.last_values.insert(
            device.to_string(),
            samples
                .into_iter()
                .map(|s| (s.name, s.value))
                .collect(),
        );
        debug!(device, "device born");
        Ok(())
    }

    async fn publish_cached_birth(
        &mut self,
        device: &str,
        rows: &[BirthMetric],
        timestamp_ms: i64,
    ) -> Result<(), PublishError> {
        let metrics = rows.iter().map(birth_wire_metric).collect();
        self.publish_message(MessageKind::DBirth, Some(device), metrics, timestamp_ms)
            .await?;
        self.session.devices.insert(device.to_string());
        self.last_values.insert(
            device.to_string(),
            rows.iter()
                .map(|r| (r.name.clone(), r.value.clone()))
                .collect(),
        );
        Ok(())
    }

    /// A device went quiet past its threshold: announce its death and drop
    /// it from the session and the birth cache.
    pub async fn device_death(
        &mut self,
        device: &str,
        timestamp_ms: i64,
    ) -> Result<(), PublishError> {
        if !self.session.devices.contains(device) {
            return Ok(());
        }
        self.publish_message(MessageKind::DDeath, Some(device), Vec::new(), timestamp_ms)
            .await?;
        self.session.devices.remove(device);
        self.last_values.remove(device);
        self.store
            .delete_birth(&self.config.edge_node_id, device)
            .await?;
        info!(device, "device death published");
        Ok(())
    }

    /// Host asked for a rebirth: new session number, fresh NBIRTH, and a
    /// DBIRTH replay for every active device. The alias map is untouched.
    pub async fn rebirth(&mut self, timestamp_ms: i64) -> Result<(), PublishError> {
        info!("rebirth requested");
        let bd_seq = self.store.load_bd_seq().await?;
        self.session.bd_seq = bd_seq;
        self.session.seq = 0;

        let nbirth = vec![
            Metric::bd_seq(bd_seq, timestamp_ms),
            Metric::rebirth_control(timestamp_ms),
        ];
        self.publish_message(MessageKind::NBirth, None, nbirth, timestamp_ms)
            .await?;
        self.store.store_bd_seq(bd_seq + 1).await?;

        let devices: Vec<String> = self.session.devices.iter().cloned().collect();
        for device in devices {
            if let Some(rows) = self
                .store
                .get_birth(&self.config.edge_node_id, &device)
                .await?
            {
                let metrics = rows.iter().map(birth_wire_metric).collect();
                self.publish_message(MessageKind::DBirth, Some(&device), metrics, timestamp_ms)
                    .await?;
            }
        }
        Ok(())
    }

    /// Graceful shutdown: DDEATH for each active device, then NDEATH with
    /// the session's bdSeq, then disconnect.
    pub async fn shutdown(&mut self, timestamp_ms: i64) -> Result<(), PublishError> {
        if !self.session.online {
            return Ok(());
        }
        let devices: Vec<String> = self.session.devices.iter().cloned().collect();
        for device in devices {
            self.device_death(&device, timestamp_ms).await?;
        }
        let ndeath = vec![Metric::bd_seq(self.session.bd_seq, timestamp_ms)];
        self.publish_message(MessageKind::NDeath, None, ndeath, timestamp_ms)
            .await?;
        self.broker.disconnect().await?;
        self.session.online = false;
        info!("lifecycle session closed");
        Ok(())
    }

    /// Fold samples buffered by an earlier failed birth into this batch.
    /// The newer observation wins per metric name.
    fn merge_pending(&mut self, device: &str, samples: Vec<MetricSample>) -> Vec<MetricSample> {
        match self.pending.remove(device) {
            Some(mut buffered) => {
                buffered.retain(|b| !samples.iter().any(|s| s.name == b.name));
                buffered.extend(samples);
                buffered
            }
            None => samples,
        }
    }

    /// Stamp the current `seq` and advance it, wrapping after 255.
    fn take_seq(&mut self) -> u8 {
        let seq = self.session.seq;
        self.session.seq = self.session.seq.wrapping_add(1);
        seq
    }

    async fn publish_message(
        &mut self,
        kind: MessageKind,
        device: Option<&str>,
        metrics: Vec<Metric>,
        timestamp_ms: i64,
    ) -> Result<(), PublishError> {
        let seq = self.take_seq();
        let payload = SparkplugPayload::with_metrics(timestamp_ms, seq, metrics);
        let topic = lifecycle_topic(
            &self.config.group_id,
            kind,
            &self.config.edge_node_id,
            device,
        );
        // All lifecycle-plane traffic is QoS 0, never retained.
        self.broker
            .publish(&topic, &payload.encode_to_bytes(), 0, false)
            .await
            .map_err(|e| {
                // The message slot is gone but the wire never saw it; rewind
                // so the on-wire sequence stays gapless.
                self.session.seq = seq;
                e
            })?;
        Ok(())
    }
}

/// Wire metric for a birth-cache row: full name, alias and any announced
/// string properties.
fn birth_wire_metric(row: &BirthMetric) -> Metric {
    Metric::named(
        row.name.clone(),
        row.alias,
        row.timestamp_ms,
        DataType::from_u32(row.datatype).unwrap_or(DataType::of_value(&row.value)),
        &row.value,
    )
    .with_properties(row.properties.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}
