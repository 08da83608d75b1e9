use std::sync::atomic::{AtomicU64, Ordering};

/// In-process counters behind `/status`, mirroring the
/// `errors_total{type=…}` families in the logs.
#[derive(Debug, Default)]
pub struct Counters {
    pub ingress_errors: AtomicU64,
    pub validation_warnings: AtomicU64,
    pub validation_rejects: AtomicU64,
    pub retained_published: AtomicU64,
    pub retained_deduped: AtomicU64,
    pub lifecycle_published: AtomicU64,
    pub drift_alerts: AtomicU64,
    pub anomaly_alerts: AtomicU64,
    pub lifecycle_transitions: AtomicU64,
    pub fidelity_alerts: AtomicU64,
    pub commands_acked: AtomicU64,
    pub commands_denied: AtomicU64,
    pub commands_invalid: AtomicU64,
    pub commands_write_failed: AtomicU64,
    pub broker_reconnects: AtomicU64,
    pub persistence_errors: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> serde_json::Value {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "ingress_errors": get(&self.ingress_errors),
            "validation_warnings": get(&self.validation_warnings),
            "validation_rejects": get(&self.validation_rejects),
            "retained_published": get(&self.retained_published),
            "retained_deduped": get(&self.retained_deduped),
            "lifecycle_published": get(&self.lifecycle_published),
            "drift_alerts": get(&self.drift_alerts),
            "anomaly_alerts": get(&self.anomaly_alerts),
            "lifecycle_transitions": get(&self.lifecycle_transitions),
            "fidelity_alerts": get(&self.fidelity_alerts),
            "commands_acked": get(&self.commands_acked),
            "commands_denied": get(&self.commands_denied),
            "commands_invalid": get(&self.commands_invalid),
            "commands_write_failed": get(&self.commands_write_failed),
            "broker_reconnects": get(&self.broker_reconnects),
            "persistence_errors": get(&self.persistence_errors),
        })
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
