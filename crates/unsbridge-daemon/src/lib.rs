//! The orchestrator: wires ingress, pipeline workers, the broker I/O
//! worker, the lifecycle timer and the status endpoints together, and owns
//! startup, reconnect and bounded graceful shutdown.

pub mod api;
pub mod counters;
pub mod error;
pub mod ingest;
pub mod io_worker;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};
use unsbridge_address::{AddressResolver, AddressSpec, MappingRules, PatternRule};
use unsbridge_broker::BrokerClient;
use unsbridge_config::{Config, MappingConfig};
use unsbridge_domain::AssetUri;
use unsbridge_hypervisor::{
    CommandHandler, ContextCache, DriftDetector, FidelityEvaluator, LifecycleTracker,
    MetadataIndex, RepositoryWriter, Validator,
};
use unsbridge_store::StateStore;

pub use counters::Counters;
pub use error::DaemonError;
pub use ingest::Snapshot;
pub use pipeline::{IoCommand, PipelineCtx, ProcessedSnapshot};

use crate::api::AppState;
use crate::io_worker::IoWorker;
use crate::pipeline::{run_pipeline_worker, IoCommand as Cmd};

/// Translate the config document's mapping section into resolver rules.
pub fn mapping_rules(config: &MappingConfig) -> MappingRules {
    let spec = |s: &unsbridge_config::AddressSpecConfig| AddressSpec {
        enterprise: s.enterprise.clone(),
        site: s.site.clone(),
        area: s.area.clone(),
        line: s.line.clone(),
        asset: s.asset.clone(),
    };
    MappingRules {
        exact: config
            .assets
            .iter()
            .map(|(uri, s)| (uri.clone(), spec(s)))
            .collect(),
        patterns: config
            .patterns
            .iter()
            .map(|p| PatternRule {
                pattern: p.pattern.clone(),
                spec: spec(&p.spec),
            })
            .collect(),
        default_spec: spec(&config.default),
    }
}

/// The assembled daemon. External collaborators (broker transport, AAS
/// repository writer, state store) are injected so tests and the CLI's
/// local mode run against in-memory implementations.
pub struct Daemon {
    config: Config,
    broker: Arc<dyn BrokerClient>,
    writer: Arc<dyn RepositoryWriter>,
    store: Arc<dyn StateStore>,
}

impl Daemon {
    pub fn new(
        config: Config,
        broker: Arc<dyn BrokerClient>,
        writer: Arc<dyn RepositoryWriter>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Daemon {
            config,
            broker,
            writer,
            store,
        }
    }

    /// Run until `shutdown` flips to true (bounded by the configured
    /// deadline) or a fatal error surfaces.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), DaemonError> {
        let Daemon {
            config,
            broker,
            writer,
            store,
        } = self;

        let counters = Arc::new(Counters::default());
        let connected = Arc::new(AtomicBool::new(false));

        let resolver = Arc::new(AddressResolver::new(mapping_rules(&config.mapping))?);
        let validator = Arc::new(Validator::new(config.semantic.clone())?);
        let metadata_index = MetadataIndex::new();
        let prefix = (!config.retained.prefix.is_empty()).then(|| config.retained.prefix.clone());
        let command_handler = Arc::new(CommandHandler::new(
            validator.clone(),
            writer,
            metadata_index.clone(),
            &config.hypervisor.allowed_write_patterns,
            &config.hypervisor.denied_write_patterns,
            config.hypervisor.validate_before_write,
            config.repository.write_retry_max,
            config.repository.write_retry_base_ms,
            prefix,
        )?);

        let (snap_tx, snap_rx) = mpsc::channel::<Snapshot>(config.daemon.queue_depth);
        let snap_rx = Arc::new(Mutex::new(snap_rx));
        let (io_tx, io_rx) = mpsc::channel::<Cmd>(config.daemon.queue_depth);

        let ctx = Arc::new(PipelineCtx {
            store: store.clone(),
            resolver: resolver.clone(),
            validator,
            metadata_index,
            context_cache: Mutex::new(ContextCache::new(store.clone(), 4096)),
            drift: DriftDetector::new(store.clone(), config.hypervisor.drift_severity.clone()),
            tracker: LifecycleTracker::new(store.clone(), config.hypervisor.stale_seconds),
            fidelity: FidelityEvaluator::new(store.clone(), config.hypervisor.fidelity.clone()),
            forests: Mutex::new(HashMap::new()),
            counters: counters.clone(),
            config: config.clone(),
        });

        // Ingress. The snapshot channel closes once every source stopped,
        // which drains the pipeline naturally on shutdown.
        if !config.watcher.paths.is_empty() {
            tokio::spawn(ingest::run_file_source(
                config.watcher.paths.clone(),
                config.watcher.poll_interval_secs,
                snap_tx.clone(),
                counters.clone(),
                shutdown.clone(),
            ));
        }
        if let Some(base_url) = config.repository.base_url.clone() {
            tokio::spawn(ingest::run_repository_poller(
                base_url,
                config.repository.poll_interval_secs,
                config.repository.timeout_secs,
                snap_tx.clone(),
                counters.clone(),
                shutdown.clone(),
            ));
        }
        drop(snap_tx);

        for _ in 0..config.daemon.parallelism {
            tokio::spawn(run_pipeline_worker(
                ctx.clone(),
                snap_rx.clone(),
                io_tx.clone(),
                shutdown.clone(),
            ));
        }

        tokio::spawn(run_lifecycle_timer(
            ctx.clone(),
            io_tx.clone(),
            shutdown.clone(),
        ));

        // Status endpoints.
        let app = api::build_app(AppState {
            connected: connected.clone(),
            counters: counters.clone(),
            store: store.clone(),
        });
        let listener = tokio::net::TcpListener::bind(&config.observability.listen).await?;
        info!(listen = %config.observability.listen, "status endpoints up");
        let mut api_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app).with_graceful_shutdown(async move {
                while api_shutdown.changed().await.is_ok() {
                    if *api_shutdown.borrow() {
                        break;
                    }
                }
            });
            if let Err(e) = served.await {
                warn!(error = %e, "status server stopped");
            }
        });

        // The broker I/O worker is the daemon's spine; run() follows it.
        let worker = IoWorker::new(
            broker,
            store,
            config.clone(),
            counters,
            connected,
            command_handler,
            io_tx.clone(),
        );
        drop(io_tx);
        let mut io_handle = tokio::spawn(worker.run(io_rx, shutdown.clone()));

        let deadline = Duration::from_secs(config.daemon.shutdown_deadline_secs.max(1));
        let mut shutdown_wait = shutdown.clone();
        let joined = tokio::select! {
            joined = &mut io_handle => joined,
            _ = async {
                while !*shutdown_wait.borrow() {
                    if shutdown_wait.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                // Shutdown requested: give the worker the configured grace
                // window, then abandon it and let the last-will speak.
                match tokio::time::timeout(deadline, &mut io_handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(
                            deadline_secs = deadline.as_secs(),
                            "graceful shutdown deadline exceeded, NDEATH left to the last-will"
                        );
                        io_handle.abort();
                        return Ok(());
                    }
                }
            }
        };
        match joined {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "broker I/O worker aborted");
                Ok(())
            }
        }
    }
}

/// Tick the liveness tracker once a second and forward transitions (plus
/// retained clears, when configured) to the I/O worker.
async fn run_lifecycle_timer(
    ctx: Arc<PipelineCtx>,
    io: mpsc::Sender<Cmd>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }
        let events = match ctx.tracker.tick(Utc::now()).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "lifecycle tick failed");
                continue;
            }
        };
        for event in events {
            let offline = event.state == unsbridge_domain::AssetLifecycle::Offline;
            let asset_id = event.asset_id.clone();
            if io.send(Cmd::LifecycleEvent(event)).await.is_err() {
                return;
            }
            if offline && ctx.config.hypervisor.clear_retained_on_offline {
                let address = ctx.resolver.resolve(&AssetUri::new(asset_id));
                if io.send(Cmd::ClearAsset(address)).await.is_err() {
                    return;
                }
            }
        }
    }
}
