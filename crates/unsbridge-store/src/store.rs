use async_trait::async_trait;

use crate::error::StoreError;
use crate::rows::{
    BirthMetric, ContextBundle, Fingerprint, FidelityRow, LifecycleRow, TableKind,
};

/// Persistent state behind the publish pipeline and the hypervisor.
///
/// Every mutation is durable when the call returns. Writers are partitioned
/// by convention: the broker I/O worker owns aliases, births and the session
/// counter; the retained publisher owns hashes; the hypervisor owns the rest.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // ── Aliases (append-only) ─────────────────────────────────────────────────

    /// Look up the alias previously allocated for a metric, if any.
    async fn get_alias(
        &self,
        edge_node: &str,
        device: &str,
        metric: &str,
    ) -> Result<Option<u64>, StoreError>;

    /// Return the existing alias or allocate the next dense one for the
    /// `(edge_node, device)` domain. The allocation is committed before the
    /// call returns, so a DBIRTH may announce it immediately.
    async fn allocate_alias(
        &self,
        edge_node: &str,
        device: &str,
        metric: &str,
    ) -> Result<u64, StoreError>;

    /// All `(metric_name, alias)` pairs known for a device.
    async fn device_aliases(
        &self,
        edge_node: &str,
        device: &str,
    ) -> Result<Vec<(String, u64)>, StoreError>;

    // ── Birth cache (last-writer-wins per device) ─────────────────────────────

    async fn put_birth(
        &self,
        edge_node: &str,
        device: &str,
        metrics: &[BirthMetric],
    ) -> Result<(), StoreError>;

    async fn get_birth(
        &self,
        edge_node: &str,
        device: &str,
    ) -> Result<Option<Vec<BirthMetric>>, StoreError>;

    async fn delete_birth(&self, edge_node: &str, device: &str) -> Result<(), StoreError>;

    /// Every cached device birth under an edge node, for rebirth replay.
    async fn list_births(
        &self,
        edge_node: &str,
    ) -> Result<Vec<(String, Vec<BirthMetric>)>, StoreError>;

    // ── Retained-plane hashes (last-writer-wins per topic) ────────────────────

    async fn get_hash(&self, topic: &str) -> Result<Option<u64>, StoreError>;

    async fn put_hash(&self, topic: &str, hash: u64) -> Result<(), StoreError>;

    /// Retained topics recorded for one asset address prefix. Used when
    /// clearing retained state on an Offline transition.
    async fn topics_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn delete_hash(&self, topic: &str) -> Result<(), StoreError>;

    // ── Drift fingerprints ────────────────────────────────────────────────────

    async fn get_fingerprint(&self, asset_uri: &str) -> Result<Option<Fingerprint>, StoreError>;

    async fn put_fingerprint(
        &self,
        asset_uri: &str,
        fingerprint: &Fingerprint,
    ) -> Result<(), StoreError>;

    // ── Lifecycle states ──────────────────────────────────────────────────────

    async fn get_lifecycle(&self, asset_uri: &str) -> Result<Option<LifecycleRow>, StoreError>;

    async fn put_lifecycle(&self, asset_uri: &str, row: &LifecycleRow) -> Result<(), StoreError>;

    async fn list_lifecycles(&self) -> Result<Vec<(String, LifecycleRow)>, StoreError>;

    // ── Context dictionary ────────────────────────────────────────────────────

    async fn get_context(&self, hash: &str) -> Result<Option<ContextBundle>, StoreError>;

    async fn put_context(&self, hash: &str, bundle: &ContextBundle) -> Result<(), StoreError>;

    // ── Fidelity history ──────────────────────────────────────────────────────

    async fn append_fidelity(&self, row: &FidelityRow) -> Result<(), StoreError>;

    async fn recent_fidelity(
        &self,
        asset_uri: &str,
        limit: usize,
    ) -> Result<Vec<FidelityRow>, StoreError>;

    // ── Streaming-drift model snapshots ───────────────────────────────────────

    async fn get_drift_model(&self, asset_uri: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put_drift_model(&self, asset_uri: &str, model: &[u8]) -> Result<(), StoreError>;

    // ── Session counter ───────────────────────────────────────────────────────

    /// The persisted 64-bit bdSeq counter (0 when never written).
    async fn load_bd_seq(&self) -> Result<u64, StoreError>;

    async fn store_bd_seq(&self, value: u64) -> Result<(), StoreError>;

    // ── Observability ─────────────────────────────────────────────────────────

    /// Rows evicted from `table` since the store was opened.
    fn evictions(&self, table: TableKind) -> u64;
}
