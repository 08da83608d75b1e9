use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::trace;
use unsbridge_domain::LeafRecord;
use unsbridge_store::{ContextBundle, StateStore};

use crate::error::HypervisorError;

/// Short content hash of a metadata bundle: SHA-256 over the canonical JSON
/// rendering, truncated to 16 hex characters.
pub fn context_hash(bundle: &ContextBundle) -> String {
    let canonical = serde_json::json!({
        "originUri": bundle.origin_uri,
        "semanticId": bundle.semantic_id,
        "source": bundle.source,
        "unit": bundle.unit,
    });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

fn bundle_for(record: &LeafRecord) -> ContextBundle {
    ContextBundle {
        semantic_id: record.semantic_id.clone(),
        unit: record.unit.clone(),
        source: record.submodel_id_short.clone(),
        origin_uri: record.origin_uri.clone(),
    }
}

/// Pointer-mode dictionary: a sized in-memory table in front of the
/// persistent context table. Queried for every record when pointer or
/// hybrid mode is active; the hypervisor is the dictionary's only writer.
pub struct ContextCache {
    store: Arc<dyn StateStore>,
    capacity: usize,
    entries: HashMap<String, ContextBundle>,
    /// Insertion order for cheap oldest-first eviction.
    order: Vec<String>,
}

impl ContextCache {
    pub fn new(store: Arc<dyn StateStore>, capacity: usize) -> Self {
        ContextCache {
            store,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The context hash and bundle for a record. On first sight the bundle
    /// is persisted to the dictionary table so a pointer payload can always
    /// be resolved after restart.
    pub async fn lookup(
        &mut self,
        record: &LeafRecord,
    ) -> Result<(String, ContextBundle), HypervisorError> {
        let bundle = bundle_for(record);
        let hash = context_hash(&bundle);

        if let Some(hit) = self.entries.get(&hash) {
            return Ok((hash, hit.clone()));
        }
        if self.store.get_context(&hash).await?.is_none() {
            self.store.put_context(&hash, &bundle).await?;
            trace!(%hash, "new context bundle recorded");
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.first().cloned() {
                self.entries.remove(&oldest);
                self.order.remove(0);
            }
        }
        self.entries.insert(hash.clone(), bundle.clone());
        self.order.push(hash.clone());
        Ok((hash, bundle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unsbridge_domain::{AssetUri, LeafKind, LeafValue};
    use unsbridge_store::InMemoryStore;

    fn record(unit: Option<&str>) -> LeafRecord {
        LeafRecord {
            asset_uri: AssetUri::new("urn:a"),
            submodel_id: "urn:sm".into(),
            submodel_id_short: "TechData".into(),
            path: vec!["Temp".into()],
            kind: LeafKind::Property,
            value: LeafValue::Float(1.0),
            value_type: "xs:double".into(),
            semantic_id: Some("sid".into()),
            unit: unit.map(String::from),
            source_timestamp_ms: 0,
            origin_uri: "file:///x".into(),
        }
    }

    #[test]
    fn hash_is_stable_and_short() {
        let bundle = ContextBundle {
            semantic_id: Some("sid".into()),
            unit: Some("degC".into()),
            source: "TechData".into(),
            origin_uri: "file:///x".into(),
        };
        let a = context_hash(&bundle);
        let b = context_hash(&bundle);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn same_metadata_shares_one_entry() {
        let store = Arc::new(InMemoryStore::new());
        let mut cache = ContextCache::new(store.clone(), 16);

        let (h1, _) = cache.lookup(&record(Some("degC"))).await.unwrap();
        let (h2, _) = cache.lookup(&record(Some("degC"))).await.unwrap();
        let (h3, _) = cache.lookup(&record(Some("degF"))).await.unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(cache.len(), 2);

        // Both bundles made it to the persistent dictionary.
        assert!(store.get_context(&h1).await.unwrap().is_some());
        assert!(store.get_context(&h3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_side_evicts_oldest_at_capacity() {
        let store = Arc::new(InMemoryStore::new());
        let mut cache = ContextCache::new(store.clone(), 2);
        let (h1, _) = cache.lookup(&record(Some("a"))).await.unwrap();
        cache.lookup(&record(Some("b"))).await.unwrap();
        cache.lookup(&record(Some("c"))).await.unwrap();
        assert_eq!(cache.len(), 2);
        // Evicted from memory, still resolvable from the store.
        assert!(store.get_context(&h1).await.unwrap().is_some());
    }
}
