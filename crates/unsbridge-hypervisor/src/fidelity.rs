use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use unsbridge_config::FidelityConfig;
use unsbridge_store::{FidelityRow, StateStore};

use crate::error::HypervisorError;

/// What one snapshot looked like on both sides of the pipeline.
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub asset_uri: String,
    /// Leaves the traversal saw, including ones that errored or were
    /// rejected downstream.
    pub total_leaves: usize,
    /// Leaves that reached a publisher.
    pub published_leaves: usize,
    /// Published leaves carrying a non-null semantic id.
    pub semantic_leaves: usize,
    /// Stringified values on the AAS side and the published side, for the
    /// entropy comparison.
    pub source_values: Vec<String>,
    pub published_values: Vec<String>,
}

/// How much of the AAS information content survived republication.
pub struct FidelityEvaluator {
    config: FidelityConfig,
    store: Arc<dyn StateStore>,
}

impl FidelityEvaluator {
    pub fn new(store: Arc<dyn StateStore>, config: FidelityConfig) -> Self {
        FidelityEvaluator { config, store }
    }

    /// Score a snapshot, persist the row into the history table, and report
    /// whether the overall score fell below the alert threshold.
    pub async fn evaluate(
        &self,
        stats: &SnapshotStats,
        now: DateTime<Utc>,
    ) -> Result<(FidelityRow, bool), HypervisorError> {
        let structural = if stats.total_leaves == 0 {
            1.0
        } else {
            stats.published_leaves as f64 / stats.total_leaves as f64
        };
        let semantic = if stats.published_leaves == 0 {
            if stats.total_leaves == 0 { 1.0 } else { 0.0 }
        } else {
            stats.semantic_leaves as f64 / stats.published_leaves as f64
        };
        let entropy = entropy_score(&stats.source_values, &stats.published_values);

        let w = &self.config;
        let weight_sum = w.weight_structural + w.weight_semantic + w.weight_entropy;
        let overall = (structural * w.weight_structural
            + semantic * w.weight_semantic
            + entropy * w.weight_entropy)
            / weight_sum;

        let row = FidelityRow {
            asset_uri: stats.asset_uri.clone(),
            structural,
            semantic,
            entropy,
            overall,
            evaluated_at: now,
        };
        self.store.append_fidelity(&row).await?;

        let alert = overall < w.alert_threshold;
        if alert {
            warn!(
                asset_uri = %stats.asset_uri,
                overall,
                threshold = w.alert_threshold,
                "fidelity below threshold"
            );
        }
        Ok((row, alert))
    }
}

/// 1 − normalized entropy loss between the source and published value
/// distributions. A lossless republication scores 1.
fn entropy_score(source: &[String], published: &[String]) -> f64 {
    let h_source = shannon_entropy(source);
    if h_source <= 0.0 {
        return 1.0;
    }
    let h_published = shannon_entropy(published);
    let loss = ((h_source - h_published) / h_source).max(0.0);
    (1.0 - loss).clamp(0.0, 1.0)
}

fn shannon_entropy(values: &[String]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    let n = values.len() as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}
