use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use unsbridge_broker::{BrokerClient, InMemoryBroker, PublishedMessage};
use unsbridge_codec::SparkplugPayload;
use unsbridge_daemon::Daemon;
use unsbridge_hypervisor::{HypervisorError, RepositoryWriter};
use unsbridge_store::InMemoryStore;

const PRESS_TEMPLATE: &str = r#"{
    "assetAdministrationShells": [{
        "id": "urn:shell:press",
        "assetInformation": { "globalAssetId": "urn:acme:press-01" }
    }],
    "submodels": [
        {
            "id": "urn:sm:tech", "idShort": "TechData",
            "submodelElements": [
                { "modelType": "Property", "idShort": "Serial",
                  "valueType": "xs:string", "value": "AB123456" },
                { "modelType": "Property", "idShort": "Temp",
                  "valueType": "xs:double", "value": "TEMP_VALUE" }
            ]
        },
        {
            "id": "urn:sm:setpoints", "idShort": "Setpoints",
            "submodelElements": [
                { "modelType": "Property", "idShort": "Target",
                  "valueType": "xs:double", "value": "50.0" }
            ]
        }
    ]
}"#;

fn press_doc(temp: &str) -> String {
    PRESS_TEMPLATE.replace("TEMP_VALUE", temp)
}

#[derive(Default)]
struct RecordingWriter {
    writes: Mutex<Vec<(String, Vec<String>, serde_json::Value)>>,
}

#[async_trait]
impl RepositoryWriter for RecordingWriter {
    async fn write_value(
        &self,
        submodel_id: &str,
        path: &[String],
        value: &serde_json::Value,
    ) -> Result<(), HypervisorError> {
        self.writes
            .lock()
            .unwrap()
            .push((submodel_id.to_string(), path.to_vec(), value.clone()));
        Ok(())
    }
}

fn config_for(dir: &std::path::Path) -> unsbridge_config::Config {
    let doc = format!(
        r#"
broker:
  host: in-memory
lifecycle:
  group_id: plant
  edge_node_id: edge-1
mapping:
  default: {{ enterprise: Acme, site: Berlin, area: Hall1, line: L1 }}
watcher:
  paths: ["{dir}"]
  poll_interval_secs: 1
state:
  dir: "{dir}/state"
observability:
  listen: 127.0.0.1:0
hypervisor:
  allowed_write_patterns: ["Setpoints/*"]
  denied_write_patterns: ["TechData/*"]
daemon:
  parallelism: 2
  queue_depth: 16
"#,
        dir = dir.display()
    );
    unsbridge_config::parse_config(&doc, "test").unwrap()
}

async fn wait_for<F: Fn(&[PublishedMessage]) -> bool>(
    broker: &InMemoryBroker,
    what: &str,
    predicate: F,
) {
    for _ in 0..100 {
        if predicate(&broker.published()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "timed out waiting for {what}; saw topics {:?}",
        broker
            .published()
            .iter()
            .map(|m| m.topic.clone())
            .collect::<Vec<_>>()
    );
}

struct Harness {
    broker: InMemoryBroker,
    writer: Arc<RecordingWriter>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<Result<(), unsbridge_daemon::DaemonError>>,
    dir: tempfile::TempDir,
}

async fn start() -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("press.json"), press_doc("25.5")).unwrap();

    let broker = InMemoryBroker::new();
    let writer = Arc::new(RecordingWriter::default());
    let store = Arc::new(InMemoryStore::new());
    let config = config_for(dir.path());
    let daemon = Daemon::new(
        config,
        Arc::new(broker.clone()),
        writer.clone(),
        store,
    );
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(daemon.run(shutdown_rx));
    Harness {
        broker,
        writer,
        shutdown,
        handle,
        dir,
    }
}

fn decode(payload: &[u8]) -> SparkplugPayload {
    SparkplugPayload::decode_from_bytes(payload).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_start_publishes_both_planes() {
    let h = start().await;

    wait_for(&h.broker, "NBIRTH", |msgs| {
        msgs.iter().any(|m| m.topic == "spBv1.0/plant/NBIRTH/edge-1")
    })
    .await;
    wait_for(&h.broker, "DBIRTH", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "spBv1.0/plant/DBIRTH/edge-1/press-01")
    })
    .await;
    wait_for(&h.broker, "retained Temp", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "Acme/Berlin/Hall1/L1/press-01/context/TechData/Temp")
    })
    .await;

    let nbirth = h.broker.published_to("spBv1.0/plant/NBIRTH/edge-1");
    let payload = decode(&nbirth[0].payload);
    assert_eq!(payload.seq, Some(0));
    assert_eq!(payload.bd_seq(), Some(0));

    let dbirth = h.broker.published_to("spBv1.0/plant/DBIRTH/edge-1/press-01");
    let birth = decode(&dbirth[0].payload);
    let serial = birth
        .metrics
        .iter()
        .find(|m| m.name.as_deref() == Some("TechData/Serial"))
        .expect("serial metric in birth");
    assert_eq!(serial.alias, Some(0));

    let temp = h
        .broker
        .retained_payload("Acme/Berlin/Hall1/L1/press-01/context/TechData/Temp")
        .expect("retained temp");
    let json: serde_json::Value = serde_json::from_slice(&temp).unwrap();
    assert_eq!(json["value"], serde_json::json!(25.5));
    assert_eq!(json["originUri"].as_str().unwrap().contains("press.json"), true);

    h.shutdown.send(true).unwrap();
    h.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_republish_is_fully_deduplicated() {
    let h = start().await;
    wait_for(&h.broker, "initial DBIRTH", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "spBv1.0/plant/DBIRTH/edge-1/press-01")
    })
    .await;
    let baseline = h.broker.published().len();

    // Rewrite the same bytes: mtime changes, content does not.
    std::fs::write(h.dir.path().join("press.json"), press_doc("25.5")).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let after: Vec<String> = h.broker.published()[baseline..]
        .iter()
        .map(|m| m.topic.clone())
        .filter(|t| t.contains("/context/") || t.contains("DDATA"))
        .collect();
    assert!(after.is_empty(), "unexpected publishes: {:?}", after);

    h.shutdown.send(true).unwrap();
    h.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn changed_value_produces_one_ddata_and_one_retained() {
    let h = start().await;
    wait_for(&h.broker, "initial DBIRTH", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "spBv1.0/plant/DBIRTH/edge-1/press-01")
    })
    .await;

    std::fs::write(h.dir.path().join("press.json"), press_doc("26.0")).unwrap();
    wait_for(&h.broker, "DDATA", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "spBv1.0/plant/DDATA/edge-1/press-01")
    })
    .await;

    let ddata = h.broker.published_to("spBv1.0/plant/DDATA/edge-1/press-01");
    assert_eq!(ddata.len(), 1);
    let payload = decode(&ddata[0].payload);
    assert_eq!(payload.metrics.len(), 1);
    assert_eq!(
        payload.metrics[0].leaf_value(),
        unsbridge_domain::LeafValue::Float(26.0)
    );

    // Serial stayed put: exactly one retained publish ever.
    let serial = h
        .broker
        .published_to("Acme/Berlin/Hall1/L1/press-01/context/TechData/Serial");
    assert_eq!(serial.len(), 1);
    let temp = h
        .broker
        .published_to("Acme/Berlin/Hall1/L1/press-01/context/TechData/Temp");
    assert_eq!(temp.len(), 2);

    h.shutdown.send(true).unwrap();
    h.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn command_path_acks_allowed_and_denies_denied() {
    let h = start().await;
    wait_for(&h.broker, "retained Target", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "Acme/Berlin/Hall1/L1/press-01/context/Setpoints/Target")
    })
    .await;

    let command = serde_json::to_vec(&serde_json::json!({
        "value": 75.5, "timestamp": 1_700_000_000_000i64, "correlation_id": "cmd-123"
    }))
    .unwrap();

    h.broker
        .inject(
            "Acme/Berlin/Hall1/L1/press-01/context/Setpoints/Target/cmd",
            &command,
        )
        .await;
    wait_for(&h.broker, "ack", |msgs| {
        msgs.iter().any(|m| {
            m.topic == "Acme/Berlin/Hall1/L1/press-01/context/Setpoints/Target"
                && serde_json::from_slice::<serde_json::Value>(&m.payload)
                    .map(|v| v["ack"] == serde_json::json!(true))
                    .unwrap_or(false)
        })
    })
    .await;

    let writes = h.writer.writes.lock().unwrap().clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "urn:sm:setpoints");
    assert_eq!(writes[0].2, serde_json::json!(75.5));
    drop(writes);

    // The denied pattern gets a nack and no write.
    h.broker
        .inject(
            "Acme/Berlin/Hall1/L1/press-01/context/TechData/Serial/cmd",
            &command,
        )
        .await;
    wait_for(&h.broker, "nack", |msgs| {
        msgs.iter().any(|m| {
            m.topic == "Acme/Berlin/Hall1/L1/press-01/context/TechData/Serial"
                && serde_json::from_slice::<serde_json::Value>(&m.payload)
                    .map(|v| v["error"] == serde_json::json!("denied"))
                    .unwrap_or(false)
        })
    })
    .await;
    assert_eq!(h.writer.writes.lock().unwrap().len(), 1);

    h.shutdown.send(true).unwrap();
    h.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_shutdown_announces_deaths() {
    let h = start().await;
    wait_for(&h.broker, "DBIRTH", |msgs| {
        msgs.iter()
            .any(|m| m.topic == "spBv1.0/plant/DBIRTH/edge-1/press-01")
    })
    .await;

    h.shutdown.send(true).unwrap();
    h.handle.await.unwrap().unwrap();

    let topics: Vec<String> = h.broker.published().iter().map(|m| m.topic.clone()).collect();
    let ddeath = topics
        .iter()
        .position(|t| t == "spBv1.0/plant/DDEATH/edge-1/press-01")
        .expect("DDEATH published");
    let ndeath = topics
        .iter()
        .position(|t| t == "spBv1.0/plant/NDEATH/edge-1")
        .expect("NDEATH published");
    assert!(ddeath < ndeath, "DDEATH must precede NDEATH");
    assert!(!h.broker.is_connected());
}
