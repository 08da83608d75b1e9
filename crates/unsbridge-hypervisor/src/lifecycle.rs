use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use unsbridge_domain::{AssetLifecycle, LifecycleEvent};
use unsbridge_store::{LifecycleRow, StateStore};

use crate::error::HypervisorError;

/// Per-asset publish liveness: Online while data flows, Stale after the
/// configured quiet period, Offline after three times that. Driven by a
/// periodic tick plus a touch on every observed publish.
pub struct LifecycleTracker {
    store: Arc<dyn StateStore>,
    stale_after: Duration,
}

impl LifecycleTracker {
    pub fn new(store: Arc<dyn StateStore>, stale_seconds: u64) -> Self {
        LifecycleTracker {
            store,
            stale_after: Duration::seconds(stale_seconds.max(1) as i64),
        }
    }

    /// Record a publish for an asset. Returns the transition event when the
    /// asset was Stale or Offline and is now back Online.
    pub async fn touch(
        &self,
        asset_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LifecycleEvent>, HypervisorError> {
        let previous = self.store.get_lifecycle(asset_uri).await?;
        let previous_state = previous.as_ref().map(|r| r.state).unwrap_or_default();
        let previous_is_some = previous.is_some();

        let recovered = previous_state != AssetLifecycle::Online;
        let row = LifecycleRow {
            state: AssetLifecycle::Online,
            last_seen: now,
            last_transition: if recovered {
                now
            } else {
                previous.map(|r| r.last_transition).unwrap_or(now)
            },
        };
        self.store.put_lifecycle(asset_uri, &row).await?;

        if recovered && previous_is_some {
            info!(asset_uri, from = %previous_state, "asset back online");
            return Ok(Some(LifecycleEvent {
                state: AssetLifecycle::Online,
                previous_state,
                asset_id: asset_uri.to_string(),
                timestamp: now,
                stale_duration_seconds: 0,
            }));
        }
        Ok(None)
    }

    /// Evaluate every tracked asset against the stale and offline
    /// thresholds. Returns one event per transition made.
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LifecycleEvent>, HypervisorError> {
        let mut events = Vec::new();
        for (asset_uri, row) in self.store.list_lifecycles().await? {
            let quiet = now - row.last_seen;
            let next = if quiet > self.stale_after * 3 {
                AssetLifecycle::Offline
            } else if quiet > self.stale_after {
                AssetLifecycle::Stale
            } else {
                AssetLifecycle::Online
            };
            if next == row.state {
                continue;
            }
            // Transitions only move away from Online here; recovery happens
            // through touch().
            if matches!(
                (row.state, next),
                (AssetLifecycle::Online, AssetLifecycle::Stale)
                    | (AssetLifecycle::Online, AssetLifecycle::Offline)
                    | (AssetLifecycle::Stale, AssetLifecycle::Offline)
            ) {
                let updated = LifecycleRow {
                    state: next,
                    last_seen: row.last_seen,
                    last_transition: now,
                };
                self.store.put_lifecycle(&asset_uri, &updated).await?;
                info!(asset_uri = %asset_uri, from = %row.state, to = %next, "asset liveness transition");
                events.push(LifecycleEvent {
                    state: next,
                    previous_state: row.state,
                    asset_id: asset_uri,
                    timestamp: now,
                    stale_duration_seconds: quiet.num_seconds(),
                });
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unsbridge_store::InMemoryStore;

    fn tracker(store: Arc<InMemoryStore>) -> LifecycleTracker {
        LifecycleTracker::new(store, 60)
    }

    #[tokio::test]
    async fn quiet_asset_goes_stale_then_offline() {
        let store = Arc::new(InMemoryStore::new());
        let t = tracker(store.clone());
        let start = Utc::now();
        t.touch("urn:a", start).await.unwrap();

        // Within the threshold: nothing.
        let events = t.tick(start + Duration::seconds(30)).await.unwrap();
        assert!(events.is_empty());

        // Past the stale threshold.
        let events = t.tick(start + Duration::seconds(90)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, AssetLifecycle::Stale);
        assert_eq!(events[0].previous_state, AssetLifecycle::Online);
        assert_eq!(events[0].stale_duration_seconds, 90);

        // Past three times the threshold.
        let events = t.tick(start + Duration::seconds(200)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, AssetLifecycle::Offline);
        assert_eq!(events[0].previous_state, AssetLifecycle::Stale);
    }

    #[tokio::test]
    async fn touch_recovers_and_reports() {
        let store = Arc::new(InMemoryStore::new());
        let t = tracker(store.clone());
        let start = Utc::now();
        t.touch("urn:a", start).await.unwrap();
        t.tick(start + Duration::seconds(90)).await.unwrap();

        let event = t
            .touch("urn:a", start + Duration::seconds(95))
            .await
            .unwrap()
            .expect("recovery event");
        assert_eq!(event.state, AssetLifecycle::Online);
        assert_eq!(event.previous_state, AssetLifecycle::Stale);

        // Back online: the next tick inside the window is quiet.
        let events = t.tick(start + Duration::seconds(100)).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn first_touch_is_not_a_transition() {
        let store = Arc::new(InMemoryStore::new());
        let t = tracker(store);
        assert!(t.touch("urn:a", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deep_quiet_jumps_straight_to_offline() {
        let store = Arc::new(InMemoryStore::new());
        let t = tracker(store);
        let start = Utc::now();
        t.touch("urn:a", start).await.unwrap();
        // One tick far past both thresholds.
        let events = t.tick(start + Duration::seconds(1000)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, AssetLifecycle::Offline);
    }
}
