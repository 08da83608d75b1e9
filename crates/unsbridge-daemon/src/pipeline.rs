use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};
use unsbridge_address::AddressResolver;
use unsbridge_config::Config;
use unsbridge_domain::{
    AssetAddress, DriftAlert, DriftEventKind, LeafRecord, LifecycleEvent, Severity,
};
use unsbridge_hypervisor::{
    CommandOutcome, ContextCache, DriftDetector, FidelityEvaluator, HalfSpaceForest,
    LifecycleTracker, MetadataIndex, Outcome, SnapshotStats, Validator,
};
use unsbridge_publish::MetricSample;
use unsbridge_store::{ContextBundle, FidelityRow, StateStore};
use unsbridge_traverse::flatten_environment;
use xxhash_rust::xxh3::xxh3_64;

use crate::counters::Counters;
use crate::ingest::Snapshot;

/// Work handed to the broker I/O worker, which serializes all wire traffic.
pub enum IoCommand {
    Snapshot(ProcessedSnapshot),
    LifecycleEvent(LifecycleEvent),
    ClearAsset(AssetAddress),
    Ack(CommandOutcome),
}

pub struct ProcessedSnapshot {
    pub asset_uri: String,
    pub address: AssetAddress,
    /// Device id on the lifecycle plane: the `asset` address segment.
    pub device: String,
    pub retained: Vec<(LeafRecord, Option<(String, ContextBundle)>)>,
    pub samples: Vec<MetricSample>,
    pub drift_alerts: Vec<DriftAlert>,
    pub fidelity_alert: Option<FidelityRow>,
    pub recovery: Option<LifecycleEvent>,
    pub timestamp_ms: i64,
}

/// Everything a pipeline worker needs, shared across workers.
pub struct PipelineCtx {
    pub config: Config,
    pub store: Arc<dyn StateStore>,
    pub resolver: Arc<AddressResolver>,
    pub validator: Arc<Validator>,
    pub metadata_index: MetadataIndex,
    pub context_cache: Mutex<ContextCache>,
    pub drift: DriftDetector,
    pub tracker: LifecycleTracker,
    pub fidelity: FidelityEvaluator,
    /// Per-asset streaming-drift forests, loaded lazily from the store.
    pub forests: Mutex<HashMap<String, HalfSpaceForest>>,
    pub counters: Arc<Counters>,
}

/// One pipeline worker: pulls snapshots from the shared queue and pushes
/// processed batches to the I/O worker until the queue closes.
pub async fn run_pipeline_worker(
    ctx: Arc<PipelineCtx>,
    snapshots: Arc<Mutex<mpsc::Receiver<Snapshot>>>,
    io: mpsc::Sender<IoCommand>,
    _shutdown: watch::Receiver<bool>,
) {
    loop {
        let snapshot = {
            let mut rx = snapshots.lock().await;
            rx.recv().await
        };
        let snapshot = match snapshot {
            Some(s) => s,
            None => return,
        };
        match process_snapshot(&ctx, snapshot).await {
            Ok(Some(processed)) => {
                if io.send(IoCommand::Snapshot(processed)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // A failed snapshot never fails the daemon.
                warn!(error = %e, "snapshot processing failed");
                Counters::bump(&ctx.counters.persistence_errors);
            }
        }
    }
}

/// Flatten, validate, address and annotate one snapshot. Returns `None`
/// when the document contained nothing publishable.
pub async fn process_snapshot(
    ctx: &PipelineCtx,
    snapshot: Snapshot,
) -> Result<Option<ProcessedSnapshot>, unsbridge_hypervisor::HypervisorError> {
    let flat = flatten_environment(&snapshot.env, &snapshot.origin_uri, snapshot.timestamp_ms);
    for _ in &flat.errors {
        Counters::bump(&ctx.counters.ingress_errors);
    }
    if flat.records.is_empty() {
        return Ok(None);
    }

    let asset_uri = flat.records[0].asset_uri.clone();
    let address = ctx.resolver.resolve(&asset_uri);
    let device = address.asset.clone();
    let now = Utc::now();

    let mut stats = SnapshotStats {
        asset_uri: asset_uri.as_str().to_string(),
        total_leaves: flat.records.len() + flat.errors.len(),
        ..SnapshotStats::default()
    };
    let mut retained = Vec::new();
    let mut samples = Vec::new();

    let pointer_active = ctx.config.retained.mode != unsbridge_config::PayloadMode::Inline;
    for record in &flat.records {
        stats.source_values.push(format!("{:?}", record.value));

        match ctx.validator.validate(record) {
            Outcome::Pass => {}
            Outcome::Warn(reason) => {
                Counters::bump(&ctx.counters.validation_warnings);
                debug!(metric = %record.metric_name(), %reason, "validation warning");
            }
            Outcome::Reject(reason) => {
                Counters::bump(&ctx.counters.validation_rejects);
                if ctx.validator.reject_invalid() {
                    debug!(metric = %record.metric_name(), %reason, "record rejected");
                    continue;
                }
                debug!(metric = %record.metric_name(), %reason, "record passed with warning");
            }
        }

        ctx.metadata_index.record_leaf(record, &address);

        let context = if pointer_active {
            let mut cache = ctx.context_cache.lock().await;
            Some(cache.lookup(record).await?)
        } else {
            None
        };

        stats.published_leaves += 1;
        if record.semantic_id.is_some() {
            stats.semantic_leaves += 1;
        }
        stats.published_values.push(format!("{:?}", record.value));
        samples.push(MetricSample::from_leaf(record));
        retained.push((record.clone(), context));
    }

    // Schema drift runs over the full snapshot, rejected records included:
    // shape changes matter even for metrics policy keeps off the wire.
    let mut drift_alerts = if ctx.config.hypervisor.drift_enabled {
        ctx.drift
            .observe_snapshot(asset_uri.as_str(), &flat.records, now)
            .await?
    } else {
        Vec::new()
    };
    for _ in &drift_alerts {
        Counters::bump(&ctx.counters.drift_alerts);
    }

    if ctx.config.hypervisor.streaming.enabled {
        let anomalies = score_streaming(ctx, asset_uri.as_str(), &flat.records, now).await?;
        for _ in &anomalies {
            Counters::bump(&ctx.counters.anomaly_alerts);
        }
        drift_alerts.extend(anomalies);
    }

    let fidelity_alert = {
        let (row, alert) = ctx.fidelity.evaluate(&stats, now).await?;
        if alert {
            Counters::bump(&ctx.counters.fidelity_alerts);
            Some(row)
        } else {
            None
        }
    };

    let recovery = ctx.tracker.touch(asset_uri.as_str(), now).await?;

    Ok(Some(ProcessedSnapshot {
        asset_uri: asset_uri.as_str().to_string(),
        address,
        device,
        retained,
        samples,
        drift_alerts,
        fidelity_alert,
        recovery,
        timestamp_ms: snapshot.timestamp_ms,
    }))
}

/// Run every numeric value of the snapshot through the asset's half-space
/// forest; scores over the configured bands become value-anomaly alerts.
async fn score_streaming(
    ctx: &PipelineCtx,
    asset_uri: &str,
    records: &[LeafRecord],
    now: chrono::DateTime<Utc>,
) -> Result<Vec<DriftAlert>, unsbridge_hypervisor::HypervisorError> {
    let streaming = &ctx.config.hypervisor.streaming;
    let mut forests = ctx.forests.lock().await;
    if !forests.contains_key(asset_uri) {
        let loaded = match ctx.store.get_drift_model(asset_uri).await? {
            Some(bytes) => HalfSpaceForest::from_bytes(&bytes).unwrap_or_else(|e| {
                warn!(asset_uri, error = %e, "drift model unreadable, rebuilding");
                new_forest(streaming, asset_uri)
            }),
            None => new_forest(streaming, asset_uri),
        };
        forests.insert(asset_uri.to_string(), loaded);
    }
    let forest = forests
        .get_mut(asset_uri)
        .expect("forest inserted above");

    let mut alerts = Vec::new();
    for record in records {
        let Some(value) = record.value.as_f64() else {
            continue;
        };
        let score = forest.observe(value);
        let severity = if score >= streaming.threshold_critical {
            Some(Severity::Critical)
        } else if score >= streaming.threshold_high {
            Some(Severity::High)
        } else if score >= streaming.threshold_medium {
            Some(Severity::Medium)
        } else {
            None
        };
        if let Some(severity) = severity {
            alerts.push(DriftAlert {
                kind: DriftEventKind::ValueAnomaly,
                asset_id: asset_uri.to_string(),
                metric_path: record.metric_name(),
                timestamp: now,
                severity,
            });
        }
    }

    let bytes = forest.to_bytes()?;
    ctx.store.put_drift_model(asset_uri, &bytes).await?;
    Ok(alerts)
}

fn new_forest(
    streaming: &unsbridge_config::StreamingDriftConfig,
    asset_uri: &str,
) -> HalfSpaceForest {
    // Seeded from the asset URI so restarts rebuild the identical forest.
    HalfSpaceForest::new(
        streaming.trees,
        streaming.depth,
        streaming.window,
        xxh3_64(asset_uri.as_bytes()),
    )
}
