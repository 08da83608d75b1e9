use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::rows::{
    BirthMetric, ContextBundle, Fingerprint, FidelityRow, LifecycleRow, TableKind,
};
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    aliases: HashMap<(String, String, String), u64>,
    next_alias: HashMap<(String, String), u64>,
    births: HashMap<(String, String), Vec<BirthMetric>>,
    hashes: HashMap<String, u64>,
    fingerprints: HashMap<String, Fingerprint>,
    lifecycle: HashMap<String, LifecycleRow>,
    context: HashMap<String, ContextBundle>,
    fidelity: Vec<FidelityRow>,
    drift_models: HashMap<String, Vec<u8>>,
    bd_seq: u64,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Suitable for tests; caps are not
/// enforced here, so `evictions` always reports zero.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    evictions: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get_alias(
        &self,
        edge_node: &str,
        device: &str,
        metric: &str,
    ) -> Result<Option<u64>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .aliases
            .get(&(edge_node.to_string(), device.to_string(), metric.to_string()))
            .copied())
    }

    async fn allocate_alias(
        &self,
        edge_node: &str,
        device: &str,
        metric: &str,
    ) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let key = (edge_node.to_string(), device.to_string(), metric.to_string());
        if let Some(existing) = guard.aliases.get(&key) {
            return Ok(*existing);
        }
        let domain = (edge_node.to_string(), device.to_string());
        let next = guard.next_alias.entry(domain).or_insert(0);
        let alias = *next;
        *next += 1;
        guard.aliases.insert(key, alias);
        Ok(alias)
    }

    async fn device_aliases(
        &self,
        edge_node: &str,
        device: &str,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .aliases
            .iter()
            .filter(|((e, d, _), _)| e == edge_node && d == device)
            .map(|((_, _, m), a)| (m.clone(), *a))
            .collect())
    }

    async fn put_birth(
        &self,
        edge_node: &str,
        device: &str,
        metrics: &[BirthMetric],
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .births
            .insert((edge_node.to_string(), device.to_string()), metrics.to_vec());
        Ok(())
    }

    async fn get_birth(
        &self,
        edge_node: &str,
        device: &str,
    ) -> Result<Option<Vec<BirthMetric>>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .births
            .get(&(edge_node.to_string(), device.to_string()))
            .cloned())
    }

    async fn delete_birth(&self, edge_node: &str, device: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .births
            .remove(&(edge_node.to_string(), device.to_string()));
        Ok(())
    }

    async fn list_births(
        &self,
        edge_node: &str,
    ) -> Result<Vec<(String, Vec<BirthMetric>)>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .births
            .iter()
            .filter(|((e, _), _)| e == edge_node)
            .map(|((_, d), m)| (d.clone(), m.clone()))
            .collect())
    }

    async fn get_hash(&self, topic: &str) -> Result<Option<u64>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.hashes.get(topic).copied())
    }

    async fn put_hash(&self, topic: &str, hash: u64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.hashes.insert(topic.to_string(), hash);
        Ok(())
    }

    async fn topics_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .hashes
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_hash(&self, topic: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.hashes.remove(topic);
        Ok(())
    }

    async fn get_fingerprint(&self, asset_uri: &str) -> Result<Option<Fingerprint>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.fingerprints.get(asset_uri).cloned())
    }

    async fn put_fingerprint(
        &self,
        asset_uri: &str,
        fingerprint: &Fingerprint,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .fingerprints
            .insert(asset_uri.to_string(), fingerprint.clone());
        Ok(())
    }

    async fn get_lifecycle(&self, asset_uri: &str) -> Result<Option<LifecycleRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.lifecycle.get(asset_uri).cloned())
    }

    async fn put_lifecycle(&self, asset_uri: &str, row: &LifecycleRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.lifecycle.insert(asset_uri.to_string(), row.clone());
        Ok(())
    }

    async fn list_lifecycles(&self) -> Result<Vec<(String, LifecycleRow)>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .lifecycle
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn get_context(&self, hash: &str) -> Result<Option<ContextBundle>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.context.get(hash).cloned())
    }

    async fn put_context(&self, hash: &str, bundle: &ContextBundle) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.context.insert(hash.to_string(), bundle.clone());
        Ok(())
    }

    async fn append_fidelity(&self, row: &FidelityRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.fidelity.push(row.clone());
        Ok(())
    }

    async fn recent_fidelity(
        &self,
        asset_uri: &str,
        limit: usize,
    ) -> Result<Vec<FidelityRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<FidelityRow> = guard
            .fidelity
            .iter()
            .filter(|r| r.asset_uri == asset_uri)
            .cloned()
            .collect();
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_drift_model(&self, asset_uri: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.drift_models.get(asset_uri).cloned())
    }

    async fn put_drift_model(&self, asset_uri: &str, model: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .drift_models
            .insert(asset_uri.to_string(), model.to_vec());
        Ok(())
    }

    async fn load_bd_seq(&self) -> Result<u64, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.bd_seq)
    }

    async fn store_bd_seq(&self, value: u64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.bd_seq = value;
        Ok(())
    }

    fn evictions(&self, _table: TableKind) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alias_domains_are_independent() {
        let store = InMemoryStore::new();
        assert_eq!(store.allocate_alias("e", "d1", "m").await.unwrap(), 0);
        assert_eq!(store.allocate_alias("e", "d1", "n").await.unwrap(), 1);
        assert_eq!(store.allocate_alias("e", "d2", "m").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn alias_allocation_stays_dense_past_the_wire_width() {
        let store = InMemoryStore::new();
        for i in 0..65_536u64 {
            let alias = store
                .allocate_alias("e", "d", &format!("m{}", i))
                .await
                .unwrap();
            assert_eq!(alias, i);
        }
        assert_eq!(
            store.allocate_alias("e", "d", "one-more").await.unwrap(),
            65_536
        );
    }

    #[tokio::test]
    async fn hash_rows_are_last_writer_wins() {
        let store = InMemoryStore::new();
        store.put_hash("t", 1).await.unwrap();
        store.put_hash("t", 2).await.unwrap();
        assert_eq!(store.get_hash("t").await.unwrap(), Some(2));
    }
}
