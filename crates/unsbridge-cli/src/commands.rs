use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use unsbridge_broker::InMemoryBroker;
use unsbridge_daemon::{Daemon, DaemonError};
use unsbridge_hypervisor::{HttpRepositoryWriter, HypervisorError, RepositoryWriter};
use unsbridge_store::{RedbStore, TableCaps};

use crate::output;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] unsbridge_config::ConfigError),

    #[error("{0}")]
    Persistence(#[from] unsbridge_store::StoreError),

    #[error("{0}")]
    Fatal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Sink for command writes when no repository is configured: every command
/// is accepted and logged, nothing leaves the process.
struct LoggingWriter;

#[async_trait]
impl RepositoryWriter for LoggingWriter {
    async fn write_value(
        &self,
        submodel_id: &str,
        path: &[String],
        value: &serde_json::Value,
    ) -> Result<(), HypervisorError> {
        info!(submodel_id, path = %path.join("/"), %value, "command write (no repository configured)");
        Ok(())
    }
}

pub async fn run(config_path: PathBuf) -> Result<(), CliError> {
    let config = unsbridge_config::load_config(&config_path)?;

    let caps = TableCaps {
        aliases: config.state.caps.aliases,
        births: config.state.caps.births,
        hashes: config.state.caps.hashes,
        fingerprints: config.state.caps.fingerprints,
        lifecycle: config.state.caps.lifecycle,
        context: config.state.caps.context,
        fidelity: config.state.caps.fidelity,
        drift_model: config.state.caps.drift_model,
    };
    let store = Arc::new(RedbStore::open(&config.state.dir.join("state.redb"), caps)?);

    let writer: Arc<dyn RepositoryWriter> = match &config.repository.base_url {
        Some(base_url) => Arc::new(
            HttpRepositoryWriter::new(base_url.clone(), config.repository.timeout_secs)
                .map_err(|e| CliError::Fatal(e.to_string()))?,
        ),
        None => {
            warn!("no repository.base_url configured, command writes are logged only");
            Arc::new(LoggingWriter)
        }
    };

    // The broker transport binding is injected at this seam. The built-in
    // client is the in-process loopback; production deployments link a
    // transport crate implementing BrokerClient against their broker.
    let broker = Arc::new(InMemoryBroker::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(config = %config_path.display(), "starting unsbridge");
    let daemon = Daemon::new(config, broker, writer, store);
    daemon.run(shutdown_rx).await.map_err(|e| match e {
        DaemonError::Store(e) => CliError::Persistence(e),
        DaemonError::PersistenceFatal(msg) => CliError::Fatal(msg),
        DaemonError::Broker(e) => CliError::Fatal(e.to_string()),
        DaemonError::Io(e) => CliError::Fatal(e.to_string()),
        other => CliError::Other(anyhow::anyhow!(other)),
    })
}

pub fn validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = unsbridge_config::load_config(&config_path)?;
    println!("{}", output::render_config_summary(&config));
    println!("configuration OK");
    Ok(())
}

pub async fn status(endpoint: String) -> Result<(), CliError> {
    let url = format!("{}/status", endpoint.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .map_err(|e| CliError::Fatal(format!("cannot reach {}: {}", url, e)))?;
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| CliError::Fatal(e.to_string()))?;
    println!("{}", output::render_status(&body));
    Ok(())
}

pub fn version() -> Result<(), CliError> {
    println!("unsbridge {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
