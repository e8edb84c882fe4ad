use async_trait::async_trait;

use crate::broker::{Broker, BrokerConnection, PublishOptions};
use crate::channel::Subscription;
use crate::error::{Error, Result};

use super::Sink;

/// Forwards every snapshot to a message broker.
///
/// Each run opens its own connection and disconnects it on the way out,
/// whether the run ended cleanly or not. A dead connection is reported as
/// [`Error::Disconnected`] before any publish is attempted, so this sink is
/// meant to sit inside [`Retrying`](super::Retrying).
pub struct RepublishSink<B> {
    broker: B,
    topic: String,
    options: PublishOptions,
    published: u64,
}

impl<B: Broker> RepublishSink<B> {
    pub fn new(broker: B, topic: impl Into<String>, options: PublishOptions) -> Self {
        Self {
            broker,
            topic: topic.into(),
            options,
            published: 0,
        }
    }

    /// Snapshots published across all connections
    pub fn published(&self) -> u64 {
        self.published
    }

    async fn forward(
        &mut self,
        connection: &mut B::Connection,
        subscription: &mut Subscription,
    ) -> Result<()> {
        while let Some(snapshot) = subscription.recv().await {
            if !connection.is_connected() {
                return Err(Error::Disconnected);
            }
            connection
                .publish(&self.topic, &snapshot, &self.options)
                .await?;
            self.published += 1;
            tracing::debug!(
                topic = %self.topic,
                timestamp = %snapshot.timestamp(),
                "Republished snapshot"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<B> Sink for RepublishSink<B>
where
    B: Broker + 'static,
{
    fn name(&self) -> &'static str {
        "republish"
    }

    async fn run(&mut self, mut subscription: Subscription) -> Result<()> {
        let mut connection = self.broker.connect().await?;
        tracing::info!(topic = %self.topic, "Republish sink connected");

        let result = self.forward(&mut connection, &mut subscription).await;

        if let Err(e) = connection.disconnect().await {
            tracing::warn!(error = %e, "Broker disconnect failed");
        }
        result
    }
}
