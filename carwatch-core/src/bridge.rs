//! Bridge mode: the broker as the snapshot producer.
//!
//! Instead of polling the vehicle API, [`MqttSource`] subscribes to the
//! telemetry topic another carwatch instance republishes to, and feeds each
//! payload into the local broadcast channel. Lost sessions are retried on a
//! fixed delay, the same way the republish sink is.

use std::time::Duration;

use chrono::Utc;

use crate::broker::{Broker, BrokerConnection};
use crate::channel::Broadcaster;
use crate::error::{Error, Result};
use crate::sinks::retry_forever;
use crate::types::Snapshot;

pub struct MqttSource<B> {
    broker: B,
    topic: String,
}

impl<B: Broker> MqttSource<B> {
    pub fn new(broker: B, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Relay broker messages into `tx` forever, reconnecting after `delay`.
    pub async fn run(self, tx: Broadcaster, delay: Duration) -> Result<()> {
        tracing::info!(topic = %self.topic, "Bridge starting");
        retry_forever("bridge", delay, || self.relay(&tx)).await
    }

    /// One broker session. Always ends in an error: the session cannot end
    /// cleanly while the process still wants snapshots.
    pub async fn relay(&self, tx: &Broadcaster) -> Result<()> {
        let mut connection = self.broker.connect().await?;
        if let Err(e) = connection.subscribe(&self.topic).await {
            if let Err(d) = connection.disconnect().await {
                tracing::debug!(error = %d, "Broker disconnect after failed subscribe failed");
            }
            return Err(e);
        }
        tracing::info!(topic = %self.topic, "Bridge subscribed");

        while let Some(payload) = connection.next_message().await {
            let snapshot = Snapshot::from_payload(payload, Utc::now());
            tracing::debug!(
                timestamp = %snapshot.timestamp(),
                bytes = snapshot.len(),
                "Relayed snapshot from broker"
            );
            tx.publish(snapshot);
        }

        if let Err(e) = connection.disconnect().await {
            tracing::debug!(error = %e, "Broker disconnect after session end failed");
        }
        Err(Error::Disconnected)
    }
}
