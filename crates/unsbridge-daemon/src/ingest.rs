use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use unsbridge_domain::aas::{AasEnvironment, Submodel};

use crate::counters::Counters;

/// One complete AAS object entering the pipeline.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub env: AasEnvironment,
    pub origin_uri: String,
    pub timestamp_ms: i64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Poll AAS environment documents (JSON) from the configured paths and emit
/// a snapshot whenever a file appears or its modification time changes.
pub async fn run_file_source(
    paths: Vec<PathBuf>,
    poll_interval_secs: u64,
    snapshots: mpsc::Sender<Snapshot>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut seen: HashMap<PathBuf, SystemTime> = HashMap::new();
    info!(?paths, "file source started");
    loop {
        for root in &paths {
            for file in json_files(root) {
                let modified = match std::fs::metadata(&file).and_then(|m| m.modified()) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if seen.get(&file) == Some(&modified) {
                    continue;
                }
                match load_environment(&file) {
                    Ok(env) => {
                        seen.insert(file.clone(), modified);
                        debug!(file = %file.display(), "AAS bundle changed");
                        let snapshot = Snapshot {
                            env,
                            origin_uri: format!("file://{}", file.display()),
                            timestamp_ms: now_ms(),
                        };
                        if snapshots.send(snapshot).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        // Leave `seen` untouched so a later rewrite retries.
                        warn!(file = %file.display(), error = %e, "unreadable AAS bundle");
                        Counters::bump(&counters.ingress_errors);
                    }
                }
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(poll_interval_secs.max(1))) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("file source stopping");
                    return;
                }
            }
        }
    }
}

fn json_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn load_environment(path: &Path) -> Result<AasEnvironment, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

/// Poll the AAS repository for its submodel snapshot. Each poll yields one
/// environment; traversal and dedupe decide whether anything new goes out.
pub async fn run_repository_poller(
    base_url: String,
    poll_interval_secs: u64,
    timeout_secs: u64,
    snapshots: mpsc::Sender<Snapshot>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "repository client construction failed");
            return;
        }
    };
    let url = format!("{}/submodels", base_url.trim_end_matches('/'));
    info!(%url, "repository poller started");
    loop {
        match fetch_submodels(&client, &url).await {
            Ok(submodels) => {
                let snapshot = Snapshot {
                    env: AasEnvironment {
                        asset_administration_shells: Vec::new(),
                        submodels,
                    },
                    origin_uri: url.clone(),
                    timestamp_ms: now_ms(),
                };
                if snapshots.send(snapshot).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(%url, error = %e, "repository poll failed");
                counters.ingress_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(poll_interval_secs.max(1))) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("repository poller stopping");
                    return;
                }
            }
        }
    }
}

async fn fetch_submodels(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<Submodel>, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("repository returned {}", response.status()));
    }
    let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
    // Both the paged shape `{"result": [...]}` and a bare array are accepted.
    let items = body
        .get("result")
        .cloned()
        .unwrap_or(body);
    serde_json::from_value(items).map_err(|e| e.to_string())
}
