//! MQTT v5 broker client built on rumqttc.
//!
//! `rumqttc` splits a session into an `AsyncClient` (requests) and an
//! `EventLoop` that must be polled to make progress. [`MqttBroker::connect`]
//! polls until the broker's ConnAck, then hands the event loop to a driver
//! task that keeps the connection's live flag current and forwards incoming
//! publishes. The driver stops at the first connection error rather than
//! reconnecting in place; reconnecting is the retry wrapper's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::types::Snapshot;

use super::{Broker, BrokerConnection, PublishOptions};

/// Request queue depth between the client and its event loop
const REQUEST_CAPACITY: usize = 64;

/// How long `disconnect` waits for the Disconnect packet to go out
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Opens MQTT v5 sessions to one broker.
pub struct MqttBroker {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl MqttBroker {
    /// Create a broker handle from configuration
    ///
    /// Returns an error if the host is missing.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config("broker.host is required".to_string()))?;

        Ok(Self {
            host,
            port: config.port,
            client_id: config.client_id(),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options
    }
}

#[async_trait]
impl Broker for MqttBroker {
    type Connection = MqttConnection;

    async fn connect(&self) -> Result<MqttConnection> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        tokio::time::timeout(self.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                Error::Broker(format!(
                    "no ConnAck from {}:{} within {:?}",
                    self.host, self.port, self.connect_timeout
                ))
            })??;

        tracing::info!(
            host = %self.host,
            port = self.port,
            client_id = %self.client_id,
            "Connected to broker"
        );

        let connected = Arc::new(AtomicBool::new(true));
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(eventloop, connected.clone(), incoming_tx));

        Ok(MqttConnection {
            client,
            connected,
            incoming: incoming_rx,
            driver,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(Error::Broker(format!("connection failed: {}", e))),
        }
    }
}

/// Poll the event loop until the connection drops.
async fn drive(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    incoming: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
            }
            Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                tracing::warn!(reason = ?disconnect.reason_code, "Broker sent disconnect");
                connected.store(false, Ordering::Release);
                return;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = incoming.send(publish.payload.to_vec());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Broker connection lost");
                connected.store(false, Ordering::Release);
                return;
            }
        }
    }
}

/// A live MQTT session.
pub struct MqttConnection {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    driver: JoinHandle<()>,
}

impl Drop for MqttConnection {
    /// Queues a Disconnect without waiting for it to be written. The driver
    /// is aborted right after, so the packet only goes out if the event loop
    /// gets polled first. Call [`BrokerConnection::disconnect`] for a clean
    /// close.
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
        self.driver.abort();
    }
}

fn publish_properties(options: &PublishOptions) -> PublishProperties {
    let expiry = u32::try_from(options.expiry.as_secs()).unwrap_or(u32::MAX);
    PublishProperties {
        message_expiry_interval: Some(expiry),
        content_type: Some(options.content_type.clone()),
        ..Default::default()
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.driver.is_finished()
    }

    async fn publish(
        &mut self,
        topic: &str,
        snapshot: &Snapshot,
        options: &PublishOptions,
    ) -> Result<()> {
        self.client
            .publish_with_properties(
                topic,
                QoS::AtLeastOnce,
                options.retain,
                snapshot.payload().to_vec(),
                publish_properties(options),
            )
            .await
            .map_err(|e| Error::Broker(format!("publish failed: {}", e)))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Broker(format!("subscribe failed: {}", e)))
    }

    async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.incoming.recv().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        let sent = self.client.disconnect().await;

        // Let the driver flush the Disconnect packet, then stop it.
        let _ = tokio::time::timeout(DISCONNECT_GRACE, &mut self.driver).await;
        self.driver.abort();

        sent.map_err(|e| Error::Broker(format!("disconnect failed: {}", e)))
    }
}
