use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::client::{BrokerClient, ConnectOptions, InboundMessage, LastWill};
use crate::error::BrokerError;

/// One publish as the broker saw it, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
struct Inner {
    published: Vec<PublishedMessage>,
    retained: HashMap<String, Vec<u8>>,
    subscriptions: Vec<String>,
    last_will: Option<LastWill>,
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
}

/// Process-local broker double.
///
/// Records every publish in order, keeps retained payloads per topic, and
/// routes publishes matching a subscription back onto the inbound channel
/// the way a loopback subscriber would see them.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<Inner>>,
    connected: Arc<AtomicBool>,
    /// When set, publish calls fail with a transport error.
    fail_publishes: Arc<AtomicBool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(256);
        let inner = Inner {
            inbound_tx: Some(tx),
            inbound_rx: Some(rx),
            ..Inner::default()
        };
        InMemoryBroker {
            inner: Arc::new(Mutex::new(inner)),
            connected: Arc::new(AtomicBool::new(false)),
            fail_publishes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Messages published to one topic, in order.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.inner
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn retained_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().retained.get(topic).cloned()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().unwrap().subscriptions.clone()
    }

    pub fn last_will(&self) -> Option<LastWill> {
        self.inner.lock().unwrap().last_will.clone()
    }

    /// Simulate a message arriving from elsewhere on the broker.
    pub async fn inject(&self, topic: &str, payload: &[u8]) {
        let tx = {
            let inner = self.inner.lock().unwrap();
            let subscribed = inner
                .subscriptions
                .iter()
                .any(|p| topic_matches(p, topic));
            if !subscribed {
                return;
            }
            inner.inbound_tx.clone()
        };
        if let Some(tx) = tx {
            let _ = tx
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .await;
        }
    }

    /// Simulate an ungraceful drop: the broker delivers the registered will.
    pub fn deliver_last_will(&self) -> Option<PublishedMessage> {
        self.connected.store(false, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let will = inner.last_will.clone()?;
        let msg = PublishedMessage {
            topic: will.topic,
            payload: will.payload,
            qos: will.qos,
            retain: will.retain,
        };
        if msg.retain {
            inner.retained.insert(msg.topic.clone(), msg.payload.clone());
        }
        inner.published.push(msg.clone());
        Some(msg)
    }

    /// Make subsequent publishes fail with a transport error.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn clear_published(&self) {
        self.inner.lock().unwrap().published.clear();
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn connect(&self, options: ConnectOptions) -> Result<(), BrokerError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_will = options.last_will;
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("simulated publish failure".into()));
        }
        trace!(topic, len = payload.len(), retain, "publish");
        let tx = {
            let mut inner = self.inner.lock().unwrap();
            if retain {
                if payload.is_empty() {
                    inner.retained.remove(topic);
                } else {
                    inner.retained.insert(topic.to_string(), payload.to_vec());
                }
            }
            inner.published.push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain,
            });
            let subscribed = inner.subscriptions.iter().any(|p| topic_matches(p, topic));
            if subscribed { inner.inbound_tx.clone() } else { None }
        };
        if let Some(tx) = tx {
            // Loopback delivery never blocks the publisher; a slow consumer
            // just misses the message, like a QoS 0 subscriber would.
            let _ = tx.try_send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, _qos: u8) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .push(pattern.to_string());
        Ok(())
    }

    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inner.lock().unwrap().inbound_rx.take()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// MQTT-style topic filter matching with `+` (one level) and `#` (rest).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut p = pattern.split('/');
    let mut t = topic.split('/');
    loop {
        match (p.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(ps), Some(ts)) if ps == ts => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c/d"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let broker = InMemoryBroker::new();
        let err = broker.publish("t", b"x", 0, false).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn retained_payloads_are_replaced_and_cleared() {
        let broker = InMemoryBroker::new();
        broker.connect(ConnectOptions::default()).await.unwrap();
        broker.publish("t", b"one", 1, true).await.unwrap();
        broker.publish("t", b"two", 1, true).await.unwrap();
        assert_eq!(broker.retained_payload("t"), Some(b"two".to_vec()));
        // Empty retained publish clears the slot.
        broker.publish("t", b"", 1, true).await.unwrap();
        assert_eq!(broker.retained_payload("t"), None);
    }

    #[tokio::test]
    async fn subscribed_publishes_loop_back() {
        let broker = InMemoryBroker::new();
        broker.connect(ConnectOptions::default()).await.unwrap();
        let mut inbound = broker.take_inbound().await.unwrap();
        broker.subscribe("cmd/#", 0).await.unwrap();

        broker.publish("cmd/x", b"hi", 0, false).await.unwrap();
        broker.publish("other/x", b"no", 0, false).await.unwrap();

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.topic, "cmd/x");
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_will_is_delivered_on_drop() {
        let broker = InMemoryBroker::new();
        broker
            .connect(ConnectOptions {
                last_will: Some(LastWill {
                    topic: "spBv1.0/g/NDEATH/e".into(),
                    payload: b"death".to_vec(),
                    qos: 0,
                    retain: false,
                }),
            })
            .await
            .unwrap();
        let will = broker.deliver_last_will().unwrap();
        assert_eq!(will.topic, "spBv1.0/g/NDEATH/e");
        assert!(!broker.is_connected());
    }
}
