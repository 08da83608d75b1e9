use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};
use unsbridge_address::{context_dict_topic, retained_topic};
use unsbridge_broker::BrokerClient;
use unsbridge_config::{PayloadMode, RetainedConfig};
use unsbridge_domain::{AssetAddress, LeafRecord};
use unsbridge_store::{ContextBundle, StateStore};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::PublishError;

/// Inline (and hybrid) retained payload. Field order is what subscribers
/// diff by eye, so it stays fixed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlinePayload<'a> {
    value: serde_json::Value,
    timestamp: i64,
    semantic_id: Option<&'a str>,
    unit: Option<&'a str>,
    source: &'a str,
    origin_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ctx: Option<&'a str>,
}

#[derive(Serialize)]
struct PointerPayload<'a> {
    value: serde_json::Value,
    timestamp: i64,
    ctx: &'a str,
}

/// Publishes one retained message per leaf, deduplicated against the
/// per-topic hash table so unchanged leaves cost nothing on the wire.
///
/// Owned by the broker I/O worker; it is the single writer of the hash table.
pub struct RetainedPublisher {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn StateStore>,
    config: RetainedConfig,
    /// Context hashes already published this session (pointer-mode side
    /// effect is idempotent per session).
    published_contexts: HashSet<String>,
}

impl RetainedPublisher {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn StateStore>,
        config: RetainedConfig,
    ) -> Self {
        RetainedPublisher {
            broker,
            store,
            config,
            published_contexts: HashSet::new(),
        }
    }

    /// Forget which context bundles were already announced. Called on
    /// reconnect so the dictionary is republished into the new session.
    pub fn reset_session(&mut self) {
        self.published_contexts.clear();
    }

    fn prefix(&self) -> Option<&str> {
        if self.config.prefix.is_empty() {
            None
        } else {
            Some(self.config.prefix.as_str())
        }
    }

    /// Compose, dedupe and publish one leaf. Returns whether anything went
    /// out on the wire (false = payload identical to the last publish).
    pub async fn publish_leaf(
        &mut self,
        address: &AssetAddress,
        record: &LeafRecord,
        context: Option<(&str, &ContextBundle)>,
    ) -> Result<bool, PublishError> {
        let topic = retained_topic(
            self.prefix(),
            address,
            &record.submodel_id_short,
            &record.path,
        );
        let payload = self.compose(record, context.map(|(h, _)| h))?;

        let hash = xxh3_64(&payload);
        if self.store.get_hash(&topic).await? == Some(hash) {
            trace!(%topic, "payload unchanged, skipping");
            return Ok(false);
        }

        // A referenced context bundle must exist on its dictionary topic
        // before the first payload pointing at it.
        if self.config.mode != PayloadMode::Inline {
            if let Some((ctx_hash, bundle)) = context {
                self.ensure_context(ctx_hash, bundle).await?;
            }
        }

        if self.config.enriched {
            // Enriched mode rides transport header support; the payload is
            // unchanged, so hashes stay comparable across modes.
            debug!(%topic, "publishing enriched");
        }
        self.broker
            .publish(&topic, &payload, self.config.qos.level(), true)
            .await?;
        self.store.put_hash(&topic, hash).await?;
        Ok(true)
    }

    fn compose(
        &self,
        record: &LeafRecord,
        ctx_hash: Option<&str>,
    ) -> Result<Vec<u8>, PublishError> {
        let bytes = match (self.config.mode, ctx_hash) {
            (PayloadMode::Pointer, Some(ctx)) => serde_json::to_vec(&PointerPayload {
                value: record.value.to_json(),
                timestamp: record.source_timestamp_ms,
                ctx,
            })?,
            // Inline, hybrid, and the pointer fallback when no context was
            // computed for this record.
            (mode, ctx) => serde_json::to_vec(&InlinePayload {
                value: record.value.to_json(),
                timestamp: record.source_timestamp_ms,
                semantic_id: record.semantic_id.as_deref(),
                unit: record.unit.as_deref(),
                source: &record.submodel_id_short,
                origin_uri: &record.origin_uri,
                ctx: if mode == PayloadMode::Hybrid { ctx } else { None },
            })?,
        };
        Ok(bytes)
    }

    async fn ensure_context(
        &mut self,
        hash: &str,
        bundle: &ContextBundle,
    ) -> Result<(), PublishError> {
        if self.published_contexts.contains(hash) {
            return Ok(());
        }
        let topic = context_dict_topic(&self.config.dictionary, hash);
        let payload = serde_json::to_vec(&serde_json::json!({
            "semanticId": bundle.semantic_id,
            "unit": bundle.unit,
            "source": bundle.source,
            "originUri": bundle.origin_uri,
        }))?;
        self.broker
            .publish(&topic, &payload, self.config.qos.level(), true)
            .await?;
        self.published_contexts.insert(hash.to_string());
        debug!(hash, "context bundle published");
        Ok(())
    }

    /// Clear the retained state of one asset: publish an empty payload to
    /// every recorded topic under its address and drop the hash rows.
    /// Returns how many topics were cleared.
    pub async fn clear_asset(&mut self, address: &AssetAddress) -> Result<usize, PublishError> {
        let mut prefix = String::new();
        if let Some(p) = self.prefix() {
            prefix.push_str(p.trim_end_matches('/'));
            prefix.push('/');
        }
        prefix.push_str(&address.to_string());
        prefix.push('/');

        let topics = self.store.topics_with_prefix(&prefix).await?;
        let count = topics.len();
        for topic in topics {
            self.broker
                .publish(&topic, &[], self.config.qos.level(), true)
                .await?;
            self.store.delete_hash(&topic).await?;
        }
        debug!(address = %address, count, "cleared retained state");
        Ok(count)
    }
}
