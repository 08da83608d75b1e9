use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use unsbridge_domain::{DriftAlert, DriftEventKind, LeafRecord, Severity};
use unsbridge_store::{Fingerprint, FingerprintEntry, StateStore};

use crate::error::HypervisorError;

/// Schema drift: diff the `(path, valueType)` shape of each full snapshot
/// against the previous one and turn the differences into alerts.
pub struct DriftDetector {
    store: Arc<dyn StateStore>,
    severity: HashMap<DriftEventKind, Severity>,
}

impl DriftDetector {
    /// `overrides` adjusts the default kind→severity function
    /// (removed = high, type change = medium, added = low).
    pub fn new(
        store: Arc<dyn StateStore>,
        overrides: HashMap<DriftEventKind, Severity>,
    ) -> Self {
        let mut severity = HashMap::from([
            (DriftEventKind::MetricRemoved, Severity::High),
            (DriftEventKind::TypeChanged, Severity::Medium),
            (DriftEventKind::MetricAdded, Severity::Low),
        ]);
        severity.extend(overrides);
        DriftDetector { store, severity }
    }

    pub fn severity_of(&self, kind: DriftEventKind) -> Severity {
        self.severity.get(&kind).copied().unwrap_or(Severity::Low)
    }

    /// Diff a full snapshot against the stored fingerprint, persist the new
    /// fingerprint, and return the alerts. The first snapshot of an asset
    /// is the baseline and produces none.
    pub async fn observe_snapshot(
        &self,
        asset_uri: &str,
        records: &[LeafRecord],
        now: DateTime<Utc>,
    ) -> Result<Vec<DriftAlert>, HypervisorError> {
        let entries: Vec<FingerprintEntry> = records
            .iter()
            .map(|r| FingerprintEntry {
                path: r.metric_name(),
                value_type: r.value_type.clone(),
            })
            .collect();
        let next = Fingerprint {
            entries,
            taken_at: Some(now),
        };

        let previous = self.store.get_fingerprint(asset_uri).await?;
        self.store.put_fingerprint(asset_uri, &next).await?;

        let previous = match previous {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };

        let old: HashMap<&str, &str> = previous
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.value_type.as_str()))
            .collect();
        let new: HashMap<&str, &str> = next
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.value_type.as_str()))
            .collect();

        let mut alerts = Vec::new();
        let mut push = |kind: DriftEventKind, path: &str| {
            alerts.push(DriftAlert {
                kind,
                asset_id: asset_uri.to_string(),
                metric_path: path.to_string(),
                timestamp: now,
                severity: self.severity_of(kind),
            });
        };

        // Emission order follows the new snapshot for added/changed, the
        // old fingerprint for removals, so alert order is deterministic.
        for entry in &next.entries {
            match old.get(entry.path.as_str()) {
                None => push(DriftEventKind::MetricAdded, &entry.path),
                Some(old_type) if *old_type != entry.value_type => {
                    push(DriftEventKind::TypeChanged, &entry.path)
                }
                Some(_) => {}
            }
        }
        for entry in &previous.entries {
            if !new.contains_key(entry.path.as_str()) {
                push(DriftEventKind::MetricRemoved, &entry.path);
            }
        }

        if !alerts.is_empty() {
            debug!(asset_uri, count = alerts.len(), "schema drift detected");
        }
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unsbridge_domain::{AssetUri, LeafKind, LeafValue};
    use unsbridge_store::InMemoryStore;

    fn record(path: &str, value_type: &str) -> LeafRecord {
        LeafRecord {
            asset_uri: AssetUri::new("urn:a"),
            submodel_id: "urn:sm".into(),
            submodel_id_short: "SM".into(),
            path: vec![path.into()],
            kind: LeafKind::Property,
            value: LeafValue::Float(1.0),
            value_type: value_type.into(),
            semantic_id: None,
            unit: None,
            source_timestamp_ms: 0,
            origin_uri: "file:///x".into(),
        }
    }

    fn detector() -> DriftDetector {
        DriftDetector::new(Arc::new(InMemoryStore::new()), HashMap::new())
    }

    #[tokio::test]
    async fn first_snapshot_is_baseline() {
        let d = detector();
        let alerts = d
            .observe_snapshot("urn:a", &[record("Temp", "xs:double")], Utc::now())
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn detects_all_three_kinds() {
        let d = detector();
        let now = Utc::now();
        d.observe_snapshot(
            "urn:a",
            &[record("Temp", "xs:double"), record("Serial", "xs:string")],
            now,
        )
        .await
        .unwrap();

        let alerts = d
            .observe_snapshot(
                "urn:a",
                &[record("Temp", "xs:int"), record("Pressure", "xs:double")],
                now,
            )
            .await
            .unwrap();

        let kinds: Vec<(DriftEventKind, &str)> = alerts
            .iter()
            .map(|a| (a.kind, a.metric_path.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (DriftEventKind::TypeChanged, "SM/Temp"),
                (DriftEventKind::MetricAdded, "SM/Pressure"),
                (DriftEventKind::MetricRemoved, "SM/Serial"),
            ]
        );
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[1].severity, Severity::Low);
        assert_eq!(alerts[2].severity, Severity::High);
    }

    #[tokio::test]
    async fn unchanged_snapshot_is_quiet() {
        let d = detector();
        let now = Utc::now();
        let records = [record("Temp", "xs:double")];
        d.observe_snapshot("urn:a", &records, now).await.unwrap();
        let alerts = d.observe_snapshot("urn:a", &records, now).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn severity_overrides_apply() {
        let overrides = HashMap::from([(DriftEventKind::MetricAdded, Severity::Critical)]);
        let d = DriftDetector::new(Arc::new(InMemoryStore::new()), overrides);
        let now = Utc::now();
        d.observe_snapshot("urn:a", &[record("A", "xs:int")], now)
            .await
            .unwrap();
        let alerts = d
            .observe_snapshot("urn:a", &[record("A", "xs:int"), record("B", "xs:int")], now)
            .await
            .unwrap();
        assert_eq!(alerts[0].severity, Severity::Critical);
    }
}
