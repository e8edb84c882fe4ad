//! Message broker integration
//!
//! Snapshots can be republished to an MQTT broker, and in bridge mode read
//! back from one. The broker is best-effort: every failure here surfaces as
//! a transient [`Error`](crate::Error) that the retry wrapper absorbs.
//!
//! ## Usage
//!
//! Enable the broker in `~/.config/carwatch/config.toml`:
//!
//! ```toml
//! [broker]
//! enabled = true
//! host = "mqtt.example.com"
//! topic = "vehicles/roadrunner/telemetry"
//! ```

mod mqtt;

pub use mqtt::{MqttBroker, MqttConnection};

use std::time::Duration;

use async_trait::async_trait;

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::types::Snapshot;

/// How a snapshot is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Ask the broker to keep the last message for new subscribers
    pub retain: bool,
    /// Drop the message instead of delivering it after this long
    pub expiry: Duration,
    /// Declared payload content type
    pub content_type: String,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

impl PublishOptions {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            retain: true,
            expiry: Duration::from_secs(u64::from(config.expiry_secs)),
            content_type: "application/json".to_string(),
        }
    }
}

/// Something that can open broker connections.
#[async_trait]
pub trait Broker: Send + Sync {
    type Connection: BrokerConnection;

    /// Open a connection and wait until the broker accepts it.
    async fn connect(&self) -> Result<Self::Connection>;
}

/// One live broker session.
///
/// Owned by exactly one task. Dropping it tears the session down; call
/// [`disconnect`](BrokerConnection::disconnect) first for a clean goodbye.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Whether the session is currently up, as reported by lifecycle events.
    fn is_connected(&self) -> bool;

    async fn publish(
        &mut self,
        topic: &str,
        snapshot: &Snapshot,
        options: &PublishOptions,
    ) -> Result<()>;

    /// Start receiving messages published to `topic`.
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Next payload received on a subscribed topic; `None` once the session ends.
    async fn next_message(&mut self) -> Option<Vec<u8>>;

    async fn disconnect(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_publish_options() {
        let options = PublishOptions::default();
        assert!(options.retain);
        assert_eq!(options.expiry, Duration::from_secs(900));
        assert_eq!(options.content_type, "application/json");
    }
}
