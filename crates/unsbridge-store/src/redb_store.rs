use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::rows::{
    BirthMetric, ContextBundle, Fingerprint, FidelityRow, LifecycleRow, TableCaps, TableKind,
    SCHEMA_VERSION,
};
use crate::store::StateStore;

const ALIASES: TableDefinition<&str, &[u8]> = TableDefinition::new("aliases");
const BIRTHS: TableDefinition<&str, &[u8]> = TableDefinition::new("births");
const HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("hashes");
const FINGERPRINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("fingerprints");
const LIFECYCLE: TableDefinition<&str, &[u8]> = TableDefinition::new("lifecycle");
const CONTEXT: TableDefinition<&str, &[u8]> = TableDefinition::new("context");
const FIDELITY: TableDefinition<&str, &[u8]> = TableDefinition::new("fidelity");
const DRIFT_MODEL: TableDefinition<&str, &[u8]> = TableDefinition::new("drift_model");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Separator for composite keys. Never appears in topics or metric names.
const SEP: char = '\u{1f}';

fn def_for(table: TableKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match table {
        TableKind::Aliases => ALIASES,
        TableKind::Births => BIRTHS,
        TableKind::Hashes => HASHES,
        TableKind::Fingerprints => FINGERPRINTS,
        TableKind::Lifecycle => LIFECYCLE,
        TableKind::Context => CONTEXT,
        TableKind::Fidelity => FIDELITY,
        TableKind::DriftModel => DRIFT_MODEL,
    }
}

/// Row wrapper carrying the touch stamp used for LRU eviction.
#[derive(Serialize, Deserialize)]
struct Stored<T> {
    t: u64,
    v: T,
}

/// Persistent state store backed by a redb database file.
///
/// Every mutation runs in its own write transaction, so a crash leaves the
/// database at some prefix of the issued writes, in order.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    caps: TableCaps,
    evictions: Arc<[AtomicU64; 8]>,
}

impl RedbStore {
    /// Open (or create) a redb database at `path`.
    ///
    /// Refuses to open a database written by a different schema version.
    /// Parent directories are created automatically.
    pub fn open(path: &Path, caps: TableCaps) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Internal(e.to_string()))?;

        // Ensure tables exist and gate on the schema version.
        {
            let wtxn = db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
            for table in TableKind::ALL {
                wtxn.open_table(def_for(table))
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
            }
            {
                let mut meta = wtxn
                    .open_table(META)
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
                let found = meta
                    .get("schema_version")
                    .map_err(|e| StoreError::Internal(e.to_string()))?
                    .map(|g| g.value());
                match found {
                    None => {
                        meta.insert("schema_version", SCHEMA_VERSION)
                            .map_err(|e| StoreError::Internal(e.to_string()))?;
                    }
                    Some(v) if v == SCHEMA_VERSION => {}
                    Some(v) => {
                        return Err(StoreError::SchemaVersion {
                            found: v,
                            expected: SCHEMA_VERSION,
                        });
                    }
                }
            }
            wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        }

        Ok(Self {
            db: Arc::new(db),
            caps,
            evictions: Arc::new(Default::default()),
        })
    }

    fn eviction_slot(&self, table: TableKind) -> &AtomicU64 {
        let idx = TableKind::ALL.iter().position(|t| *t == table).unwrap();
        &self.evictions[idx]
    }

    fn get_row<T: DeserializeOwned>(
        &self,
        table: TableKind,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let t = rtxn
            .open_table(def_for(table))
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match t.get(key).map_err(|e| StoreError::Internal(e.to_string()))? {
            Some(guard) => {
                let stored: Stored<T> = serde_json::from_slice(guard.value())?;
                Ok(Some(stored.v))
            }
            None => Ok(None),
        }
    }

    /// Insert or overwrite a row, advancing the touch clock and evicting the
    /// least-recently-touched row when a new key would exceed the table cap.
    /// Everything happens inside one write transaction.
    fn put_row<T: Serialize>(
        &self,
        table: TableKind,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut meta = wtxn
                .open_table(META)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            let clock = next_clock(&mut meta)?;

            let mut t = wtxn
                .open_table(def_for(table))
                .map_err(|e| StoreError::Internal(e.to_string()))?;

            let is_new = t
                .get(key)
                .map_err(|e| StoreError::Internal(e.to_string()))?
                .is_none();
            let len = t.len().map_err(|e| StoreError::Internal(e.to_string()))?;
            if is_new && len >= self.caps.for_table(table) {
                if let Some(victim) = least_touched(&t)? {
                    t.remove(victim.as_str())
                        .map_err(|e| StoreError::Internal(e.to_string()))?;
                    self.eviction_slot(table).fetch_add(1, Ordering::Relaxed);
                    debug!(table = %table, key = %victim, "evicted least-recently-touched row");
                }
            }

            let bytes = serde_json::to_vec(&Stored { t: clock, v: value })?;
            t.insert(key, bytes.as_slice())
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    fn remove_row(&self, table: TableKind, key: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut t = wtxn
                .open_table(def_for(table))
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            t.remove(key).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    /// All `(key, value)` pairs whose key starts with `prefix`.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table: TableKind,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let t = rtxn
            .open_table(def_for(table))
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(|e| StoreError::Internal(e.to_string()))? {
            let (k, v) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            let key = k.value().to_string();
            if !key.starts_with(prefix) {
                continue;
            }
            let stored: Stored<T> = serde_json::from_slice(v.value())?;
            out.push((key, stored.v));
        }
        Ok(out)
    }

    fn get_meta(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let meta = rtxn
            .open_table(META)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(meta
            .get(key)
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .map(|g| g.value()))
    }

    fn put_meta(&self, key: &str, value: u64) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut meta = wtxn
                .open_table(META)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            meta.insert(key, value)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

fn next_clock(meta: &mut redb::Table<&str, u64>) -> Result<u64, StoreError> {
    let clock = meta
        .get("touch_clock")
        .map_err(|e| StoreError::Internal(e.to_string()))?
        .map(|g| g.value())
        .unwrap_or(0)
        + 1;
    meta.insert("touch_clock", clock)
        .map_err(|e| StoreError::Internal(e.to_string()))?;
    Ok(clock)
}

fn least_touched(table: &redb::Table<&str, &[u8]>) -> Result<Option<String>, StoreError> {
    let mut victim: Option<(String, u64)> = None;
    for entry in table.iter().map_err(|e| StoreError::Internal(e.to_string()))? {
        let (k, v) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
        let stored: Stored<serde_json::Value> = serde_json::from_slice(v.value())?;
        let better = victim.as_ref().map_or(true, |(_, t)| stored.t < *t);
        if better {
            victim = Some((k.value().to_string(), stored.t));
        }
    }
    Ok(victim.map(|(k, _)| k))
}

fn alias_key(edge_node: &str, device: &str, metric: &str) -> String {
    format!("{edge_node}{SEP}{device}{SEP}{metric}")
}

fn device_key(edge_node: &str, device: &str) -> String {
    format!("{edge_node}{SEP}{device}")
}

#[async_trait]
impl StateStore for RedbStore {
    async fn get_alias(
        &self,
        edge_node: &str,
        device: &str,
        metric: &str,
    ) -> Result<Option<u64>, StoreError> {
        self.get_row(TableKind::Aliases, &alias_key(edge_node, device, metric))
    }

    async fn allocate_alias(
        &self,
        edge_node: &str,
        device: &str,
        metric: &str,
    ) -> Result<u64, StoreError> {
        if let Some(existing) = self.get_alias(edge_node, device, metric).await? {
            return Ok(existing);
        }
        // Row and counter commit in the same transaction; the dense counter
        // lives in meta, not in the row count, so a cap eviction can never
        // cause an alias to be reused.
        let counter_key = format!("next_alias{SEP}{edge_node}{SEP}{device}");
        let key = alias_key(edge_node, device, metric);
        let wtxn = self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        let next;
        {
            let mut meta = wtxn
                .open_table(META)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            next = meta
                .get(counter_key.as_str())
                .map_err(|e| StoreError::Internal(e.to_string()))?
                .map(|g| g.value())
                .unwrap_or(0);
            meta.insert(counter_key.as_str(), next + 1)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            let clock = next_clock(&mut meta)?;

            let mut t = wtxn
                .open_table(ALIASES)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            let bytes = serde_json::to_vec(&Stored { t: clock, v: next })?;
            t.insert(key.as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(next)
    }

    async fn device_aliases(
        &self,
        edge_node: &str,
        device: &str,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        let prefix = format!("{edge_node}{SEP}{device}{SEP}");
        let rows: Vec<(String, u64)> = self.scan_prefix(TableKind::Aliases, &prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect())
    }

    async fn put_birth(
        &self,
        edge_node: &str,
        device: &str,
        metrics: &[BirthMetric],
    ) -> Result<(), StoreError> {
        self.put_row(TableKind::Births, &device_key(edge_node, device), &metrics)
    }

    async fn get_birth(
        &self,
        edge_node: &str,
        device: &str,
    ) -> Result<Option<Vec<BirthMetric>>, StoreError> {
        self.get_row(TableKind::Births, &device_key(edge_node, device))
    }

    async fn delete_birth(&self, edge_node: &str, device: &str) -> Result<(), StoreError> {
        self.remove_row(TableKind::Births, &device_key(edge_node, device))
    }

    async fn list_births(
        &self,
        edge_node: &str,
    ) -> Result<Vec<(String, Vec<BirthMetric>)>, StoreError> {
        let prefix = format!("{edge_node}{SEP}");
        let rows: Vec<(String, Vec<BirthMetric>)> =
            self.scan_prefix(TableKind::Births, &prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect())
    }

    async fn get_hash(&self, topic: &str) -> Result<Option<u64>, StoreError> {
        self.get_row(TableKind::Hashes, topic)
    }

    async fn put_hash(&self, topic: &str, hash: u64) -> Result<(), StoreError> {
        self.put_row(TableKind::Hashes, topic, &hash)
    }

    async fn topics_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String, u64)> = self.scan_prefix(TableKind::Hashes, prefix)?;
        Ok(rows.into_iter().map(|(k, _)| k).collect())
    }

    async fn delete_hash(&self, topic: &str) -> Result<(), StoreError> {
        self.remove_row(TableKind::Hashes, topic)
    }

    async fn get_fingerprint(&self, asset_uri: &str) -> Result<Option<Fingerprint>, StoreError> {
        self.get_row(TableKind::Fingerprints, asset_uri)
    }

    async fn put_fingerprint(
        &self,
        asset_uri: &str,
        fingerprint: &Fingerprint,
    ) -> Result<(), StoreError> {
        self.put_row(TableKind::Fingerprints, asset_uri, fingerprint)
    }

    async fn get_lifecycle(&self, asset_uri: &str) -> Result<Option<LifecycleRow>, StoreError> {
        self.get_row(TableKind::Lifecycle, asset_uri)
    }

    async fn put_lifecycle(&self, asset_uri: &str, row: &LifecycleRow) -> Result<(), StoreError> {
        self.put_row(TableKind::Lifecycle, asset_uri, row)
    }

    async fn list_lifecycles(&self) -> Result<Vec<(String, LifecycleRow)>, StoreError> {
        self.scan_prefix(TableKind::Lifecycle, "")
    }

    async fn get_context(&self, hash: &str) -> Result<Option<ContextBundle>, StoreError> {
        self.get_row(TableKind::Context, hash)
    }

    async fn put_context(&self, hash: &str, bundle: &ContextBundle) -> Result<(), StoreError> {
        self.put_row(TableKind::Context, hash, bundle)
    }

    async fn append_fidelity(&self, row: &FidelityRow) -> Result<(), StoreError> {
        // Touch clock doubles as a unique suffix so history rows never collide.
        let clock = self.get_meta("touch_clock")?.unwrap_or(0);
        let key = format!("{}{SEP}{:020}", row.asset_uri, clock + 1);
        self.put_row(TableKind::Fidelity, &key, row)
    }

    async fn recent_fidelity(
        &self,
        asset_uri: &str,
        limit: usize,
    ) -> Result<Vec<FidelityRow>, StoreError> {
        let prefix = format!("{asset_uri}{SEP}");
        let mut rows: Vec<(String, FidelityRow)> =
            self.scan_prefix(TableKind::Fidelity, &prefix)?;
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        rows.truncate(limit);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }

    async fn get_drift_model(&self, asset_uri: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_row(TableKind::DriftModel, asset_uri)
    }

    async fn put_drift_model(&self, asset_uri: &str, model: &[u8]) -> Result<(), StoreError> {
        self.put_row(TableKind::DriftModel, asset_uri, &model)
    }

    async fn load_bd_seq(&self) -> Result<u64, StoreError> {
        Ok(self.get_meta("bd_seq")?.unwrap_or(0))
    }

    async fn store_bd_seq(&self, value: u64) -> Result<(), StoreError> {
        self.put_meta("bd_seq", value)
    }

    fn evictions(&self, table: TableKind) -> u64 {
        self.eviction_slot(table).load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use unsbridge_domain::LeafValue;

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(&dir.path().join("state.redb"), TableCaps::default()).unwrap()
    }

    #[tokio::test]
    async fn alias_allocation_is_dense_and_stable() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.allocate_alias("edge", "press", "Serial").await.unwrap(), 0);
        assert_eq!(store.allocate_alias("edge", "press", "Temp").await.unwrap(), 1);
        // Re-allocation returns the existing alias.
        assert_eq!(store.allocate_alias("edge", "press", "Serial").await.unwrap(), 0);
        // Other devices allocate independently.
        assert_eq!(store.allocate_alias("edge", "mill", "Temp").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn aliases_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = RedbStore::open(&path, TableCaps::default()).unwrap();
            store.allocate_alias("edge", "press", "Serial").await.unwrap();
            store.allocate_alias("edge", "press", "Temp").await.unwrap();
        }
        {
            let store = RedbStore::open(&path, TableCaps::default()).unwrap();
            assert_eq!(store.get_alias("edge", "press", "Temp").await.unwrap(), Some(1));
            assert_eq!(store.allocate_alias("edge", "press", "Pressure").await.unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn birth_cache_is_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let m1 = vec![BirthMetric {
            name: "TechData/Serial".into(),
            alias: 0,
            datatype: 12,
            value: LeafValue::Text("A".into()),
            timestamp_ms: 1,
            properties: vec![],
        }];
        let m2 = vec![BirthMetric {
            name: "TechData/Serial".into(),
            alias: 0,
            datatype: 12,
            value: LeafValue::Text("B".into()),
            timestamp_ms: 2,
            properties: vec![("semanticId".into(), "0173-1#02-AAM556#002".into())],
        }];
        store.put_birth("edge", "press", &m1).await.unwrap();
        store.put_birth("edge", "press", &m2).await.unwrap();

        let got = store.get_birth("edge", "press").await.unwrap().unwrap();
        assert_eq!(got, m2);

        store.delete_birth("edge", "press").await.unwrap();
        assert!(store.get_birth("edge", "press").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cap_evicts_exactly_one_least_touched_row() {
        let dir = TempDir::new().unwrap();
        let caps = TableCaps { hashes: 3, ..TableCaps::default() };
        let store = RedbStore::open(&dir.path().join("state.redb"), caps).unwrap();

        store.put_hash("t/a", 1).await.unwrap();
        store.put_hash("t/b", 2).await.unwrap();
        store.put_hash("t/c", 3).await.unwrap();
        // Touch t/a so t/b becomes the eviction victim.
        store.put_hash("t/a", 10).await.unwrap();

        store.put_hash("t/d", 4).await.unwrap();
        assert_eq!(store.evictions(TableKind::Hashes), 1);
        assert!(store.get_hash("t/b").await.unwrap().is_none());
        assert_eq!(store.get_hash("t/a").await.unwrap(), Some(10));
        assert_eq!(store.get_hash("t/d").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn overwrite_at_cap_does_not_evict() {
        let dir = TempDir::new().unwrap();
        let caps = TableCaps { hashes: 2, ..TableCaps::default() };
        let store = RedbStore::open(&dir.path().join("state.redb"), caps).unwrap();

        store.put_hash("t/a", 1).await.unwrap();
        store.put_hash("t/b", 2).await.unwrap();
        store.put_hash("t/a", 3).await.unwrap();
        assert_eq!(store.evictions(TableKind::Hashes), 0);
        assert_eq!(store.get_hash("t/a").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn topics_with_prefix_filters() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.put_hash("Acme/B/1/L/press/context/TD/Temp", 1).await.unwrap();
        store.put_hash("Acme/B/1/L/press/context/TD/Serial", 2).await.unwrap();
        store.put_hash("Acme/B/1/L/mill/context/TD/Temp", 3).await.unwrap();

        let topics = store.topics_with_prefix("Acme/B/1/L/press/").await.unwrap();
        assert_eq!(topics.len(), 2);
    }

    #[tokio::test]
    async fn bd_seq_defaults_to_zero_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.redb");
        {
            let store = RedbStore::open(&path, TableCaps::default()).unwrap();
            assert_eq!(store.load_bd_seq().await.unwrap(), 0);
            store.store_bd_seq(7).await.unwrap();
        }
        {
            let store = RedbStore::open(&path, TableCaps::default()).unwrap();
            assert_eq!(store.load_bd_seq().await.unwrap(), 7);
        }
    }

    #[tokio::test]
    async fn fidelity_history_is_ordered_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for overall in [0.5, 0.7, 0.9] {
            store
                .append_fidelity(&FidelityRow {
                    asset_uri: "urn:a".into(),
                    structural: overall,
                    semantic: overall,
                    entropy: overall,
                    overall,
                    evaluated_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_fidelity("urn:a", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].overall, 0.9);
        assert_eq!(recent[1].overall, 0.7);
    }
}
