use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// Message the broker delivers when death is not announced gracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Registered with the broker before the session opens.
    pub last_will: Option<LastWill>,
}

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Connect/publish/subscribe/last-will hooks of the underlying broker
/// transport. One client instance represents one session; all publish
/// calls are funneled through a single owner task.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    async fn connect(&self, options: ConnectOptions) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), BrokerError>;

    async fn subscribe(&self, pattern: &str, qos: u8) -> Result<(), BrokerError>;

    /// The stream of messages arriving on subscribed topics. Yields the
    /// receiver once; later calls return `None`.
    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>>;

    fn is_connected(&self) -> bool;
}
