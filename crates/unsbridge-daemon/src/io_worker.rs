use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use unsbridge_address::{command_subscription, drift_alert_topic, escape_segment, lifecycle_event_topic};
use unsbridge_broker::{BrokerClient, ConnectOptions, InboundMessage};
use unsbridge_codec::SparkplugPayload;
use unsbridge_config::Config;
use unsbridge_hypervisor::{CommandDisposition, CommandHandler};
use unsbridge_publish::{LifecycleEngine, PublishError, RetainedPublisher};
use unsbridge_store::StateStore;

use crate::counters::Counters;
use crate::error::DaemonError;
use crate::pipeline::IoCommand;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The single owner of the broker client. Serializes every publish, owns
/// the lifecycle session (and with it `seq`), and drives reconnects.
pub struct IoWorker {
    broker: Arc<dyn BrokerClient>,
    config: Config,
    counters: Arc<Counters>,
    connected: Arc<AtomicBool>,
    command_handler: Arc<CommandHandler>,
    retained: RetainedPublisher,
    engine: LifecycleEngine,
    io_tx: mpsc::Sender<IoCommand>,
    persistence_strikes: u32,
}

impl IoWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn StateStore>,
        config: Config,
        counters: Arc<Counters>,
        connected: Arc<AtomicBool>,
        command_handler: Arc<CommandHandler>,
        io_tx: mpsc::Sender<IoCommand>,
    ) -> Self {
        let retained =
            RetainedPublisher::new(broker.clone(), store.clone(), config.retained.clone());
        let engine = LifecycleEngine::new(broker.clone(), store, config.lifecycle.clone());
        IoWorker {
            broker,
            config,
            counters,
            connected,
            command_handler,
            retained,
            engine,
            io_tx,
            persistence_strikes: 0,
        }
    }

    pub async fn run(
        mut self,
        mut io_rx: mpsc::Receiver<IoCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), DaemonError> {
        let mut inbound = self.broker.take_inbound().await;

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }
            if !self.broker.is_connected() {
                match self.reconnect_loop(&mut shutdown).await? {
                    true => {}
                    false => break 'outer,
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break 'outer;
                    }
                }
                cmd = io_rx.recv() => match cmd {
                    None => break 'outer,
                    Some(cmd) => self.dispatch(cmd).await?,
                },
                msg = recv_inbound(&mut inbound) => {
                    if let Some(msg) = msg {
                        self.handle_inbound(msg).await?;
                    }
                }
            }
        }

        // Graceful close: drain what the pipeline already queued, then
        // announce deaths. The caller bounds this with the hard deadline.
        while let Ok(cmd) = io_rx.try_recv() {
            self.dispatch(cmd).await?;
        }
        if let Err(e) = self.engine.shutdown(now_ms()).await {
            warn!(error = %e, "graceful lifecycle shutdown failed, last-will covers it");
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("broker I/O worker stopped");
        Ok(())
    }

    /// Exponential backoff between `reconnect_min_secs` and
    /// `reconnect_max_secs`. Returns false when shutdown interrupted it.
    async fn reconnect_loop(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, DaemonError> {
        self.connected.store(false, Ordering::SeqCst);
        self.engine.on_disconnect();
        let max = Duration::from_secs(self.config.lifecycle.reconnect_max_secs.max(1));
        let mut delay = Duration::from_secs(self.config.lifecycle.reconnect_min_secs.max(1));
        loop {
            if *shutdown.borrow() {
                return Ok(false);
            }
            match self.open_session().await {
                Ok(()) => {
                    self.connected.store(true, Ordering::SeqCst);
                    Counters::bump(&self.counters.broker_reconnects);
                    return Ok(true);
                }
                Err(DaemonError::Broker(e)) if e.is_fatal() => {
                    error!(error = %e, "broker refused the session");
                    return Err(DaemonError::Broker(e));
                }
                Err(e) => {
                    warn!(error = %e, delay_secs = delay.as_secs(), "connect failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(false);
                            }
                        }
                    }
                    delay = (delay * 2).min(max);
                }
            }
        }
    }

    async fn open_session(&mut self) -> Result<(), DaemonError> {
        let ts = now_ms();
        let will = self.engine.prepare_will(ts).await?;
        self.broker
            .connect(ConnectOptions {
                last_will: Some(will),
            })
            .await?;
        // NBIRTH, command subscription, and birth-cache replay. A failure
        // here aborts the attempt; the backoff loop retries.
        self.engine.establish(ts).await?;
        self.retained.reset_session();
        let prefix = if self.config.retained.prefix.is_empty() {
            None
        } else {
            Some(self.config.retained.prefix.as_str())
        };
        self.broker
            .subscribe(&command_subscription(prefix), 1)
            .await?;
        Ok(())
    }

    async fn dispatch(&mut self, cmd: IoCommand) -> Result<(), DaemonError> {
        let outcome = self.dispatch_inner(cmd).await;
        match outcome {
            Ok(()) => {
                self.persistence_strikes = 0;
                Ok(())
            }
            Err(PublishError::Broker(e)) => {
                // Transient: the next loop iteration reconnects. Whatever
                // was lost is covered by dedupe and the birth cache.
                warn!(error = %e, "publish failed, session marked down");
                self.engine.on_disconnect();
                self.connected.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(PublishError::Store(e)) => {
                Counters::bump(&self.counters.persistence_errors);
                self.persistence_strikes += 1;
                if self.persistence_strikes >= 2 {
                    return Err(DaemonError::PersistenceFatal(e.to_string()));
                }
                warn!(error = %e, "persistence failure, one retry remaining");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "publish pipeline error");
                Ok(())
            }
        }
    }

    async fn dispatch_inner(&mut self, cmd: IoCommand) -> Result<(), PublishError> {
        match cmd {
            IoCommand::Snapshot(snapshot) => {
                if self.config.retained.enabled {
                    for (record, context) in &snapshot.retained {
                        let ctx = context.as_ref().map(|(h, b)| (h.as_str(), b));
                        let sent = self
                            .retained
                            .publish_leaf(&snapshot.address, record, ctx)
                            .await?;
                        if sent {
                            Counters::bump(&self.counters.retained_published);
                        } else {
                            Counters::bump(&self.counters.retained_deduped);
                        }
                    }
                }
                if self.config.lifecycle.enabled && !snapshot.samples.is_empty() {
                    self.engine
                        .handle_samples(&snapshot.device, snapshot.samples, snapshot.timestamp_ms)
                        .await?;
                    Counters::bump(&self.counters.lifecycle_published);
                }
                for alert in &snapshot.drift_alerts {
                    let payload = serde_json::to_vec(alert)?;
                    self.broker
                        .publish(&drift_alert_topic(&alert.asset_id), &payload, 1, false)
                        .await?;
                }
                if let Some(row) = &snapshot.fidelity_alert {
                    let topic = format!("UNS/Sys/Fidelity/{}", escape_segment(&snapshot.asset_uri));
                    let payload = serde_json::to_vec(row)?;
                    self.broker.publish(&topic, &payload, 1, false).await?;
                }
                if let Some(event) = &snapshot.recovery {
                    self.publish_lifecycle_event(event).await?;
                }
                Ok(())
            }
            IoCommand::LifecycleEvent(event) => self.publish_lifecycle_event(&event).await,
            IoCommand::ClearAsset(address) => {
                self.retained.clear_asset(&address).await?;
                Ok(())
            }
            IoCommand::Ack(outcome) => {
                match outcome.disposition {
                    CommandDisposition::Acked => Counters::bump(&self.counters.commands_acked),
                    CommandDisposition::Denied => Counters::bump(&self.counters.commands_denied),
                    CommandDisposition::Invalid => Counters::bump(&self.counters.commands_invalid),
                    CommandDisposition::WriteFailed => {
                        Counters::bump(&self.counters.commands_write_failed)
                    }
                }
                let payload = serde_json::to_vec(&outcome.payload)?;
                self.broker.publish(&outcome.topic, &payload, 1, false).await?;
                Ok(())
            }
        }
    }

    async fn publish_lifecycle_event(
        &mut self,
        event: &unsbridge_domain::LifecycleEvent,
    ) -> Result<(), PublishError> {
        Counters::bump(&self.counters.lifecycle_transitions);
        let payload = serde_json::to_vec(event)?;
        self.broker
            .publish(&lifecycle_event_topic(&event.asset_id), &payload, 1, false)
            .await?;
        Ok(())
    }

    async fn handle_inbound(&mut self, msg: InboundMessage) -> Result<(), DaemonError> {
        if msg.topic == self.engine.command_topic() {
            match SparkplugPayload::decode_from_bytes(&msg.payload) {
                Ok(payload) if payload.requests_rebirth() => {
                    self.engine.rebirth(now_ms()).await?;
                }
                Ok(_) => {}
                Err(e) => warn!(topic = %msg.topic, error = %e, "undecodable node command"),
            }
            return Ok(());
        }
        if msg.topic.ends_with("/cmd") {
            // Command handling runs off-worker; per-path serialization
            // lives inside the handler. The ack comes back as an IoCommand.
            let handler = self.command_handler.clone();
            let io_tx = self.io_tx.clone();
            tokio::spawn(async move {
                if let Some(outcome) = handler.handle(&msg.topic, &msg.payload, now_ms()).await {
                    let _ = io_tx.send(IoCommand::Ack(outcome)).await;
                }
            });
        }
        Ok(())
    }
}

async fn recv_inbound(
    inbound: &mut Option<mpsc::Receiver<InboundMessage>>,
) -> Option<InboundMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
