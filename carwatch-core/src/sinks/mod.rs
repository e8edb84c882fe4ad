//! Snapshot consumers.
//!
//! Each [`Sink`] owns one [`Subscription`] and performs a single side effect
//! per snapshot, forever. Sinks run in their own tasks and never see each
//! other; a slow or failing sink only affects its own queue.
//!
//! | Sink | Side effect | On failure |
//! |------|-------------|------------|
//! | [`PersistSink`] | append to the snapshot store | process exits |
//! | [`RepublishSink`] | publish to the broker | wrapped in [`Retrying`] |
//! | [`WatchdogSink`] | none; watches for silence | process exits |

mod persist;
mod republish;
mod retry;
mod watchdog;

pub use persist::PersistSink;
pub use republish::RepublishSink;
pub use retry::{retry_forever, Retrying, DEFAULT_RETRY_DELAY};
pub use watchdog::WatchdogSink;

use async_trait::async_trait;

use crate::channel::Subscription;
use crate::error::Result;

/// A long-running consumer of the snapshot stream.
#[async_trait]
pub trait Sink: Send + 'static {
    /// Short name used in logs and exit reports.
    fn name(&self) -> &'static str;

    /// Consume `subscription` until a failure, or until the channel closes.
    async fn run(&mut self, subscription: Subscription) -> Result<()>;
}

#[async_trait]
impl Sink for Box<dyn Sink> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn run(&mut self, subscription: Subscription) -> Result<()> {
        (**self).run(subscription).await
    }
}
