//! # carwatch-core
//!
//! Core library for carwatch - a vehicle telemetry poller.
//!
//! This library provides:
//! - The snapshot type and a fan-out broadcast channel
//! - The gatherer that polls the vehicle API on an adaptive schedule
//! - Sinks that persist, republish and watch the snapshot stream
//! - A supervisor that ties the lifetime of all of them together
//! - Configuration, logging and SQLite storage
//!
//! ## Architecture
//!
//! Data flows one way:
//!
//! ```text
//! TelemetrySource -> Gatherer -> Broadcaster -> { PersistSink, RepublishSink, WatchdogSink }
//! ```
//!
//! Each sink reads its own [`Subscription`] and runs in its own task. The
//! first task to finish, for any reason, ends the process.
//!
//! ## Example
//!
//! ```rust,no_run
//! use carwatch_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&config.store.path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use broker::{Broker, BrokerConnection, MqttBroker, PublishOptions};
pub use bridge::MqttSource;
pub use channel::{Broadcaster, Subscription};
pub use config::Config;
pub use credentials::{CredentialProvider, FileCredentialProvider};
pub use db::{Database, SnapshotStore};
pub use error::{Error, Result};
pub use gatherer::{Gatherer, Schedule};
pub use sinks::{PersistSink, RepublishSink, Retrying, Sink, WatchdogSink};
pub use source::{HttpTelemetrySource, TelemetrySource};
pub use supervisor::{Exit, Supervisor};
pub use types::*;

// Public modules
pub mod bridge;
pub mod broker;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod gatherer;
pub mod logging;
pub mod sinks;
pub mod source;
pub mod supervisor;
pub mod types;
