//! Fault isolation for best-effort sinks.
//!
//! A wrapped sink that fails is logged, left alone for a fixed delay, and
//! started again from scratch with a fresh subscription. The delay never
//! grows and the number of restarts is unbounded. Snapshots published while
//! the sink is down are not replayed.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{Broadcaster, Subscription};
use crate::error::{Error, Result};

use super::Sink;

/// Delay between a failure and the next start
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run `attempt` until it returns `Ok`, sleeping `delay` after every failure.
///
/// Errors never escape; the returned `Result` is always `Ok`.
pub async fn retry_forever<F, Fut>(name: &str, delay: Duration, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failures: u64 = 0;
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                failures += 1;
                back_off(name, &e, failures, delay).await;
            }
        }
    }
}

/// Every failure is retried. Only the log level depends on whether the
/// error is expected to clear up on its own.
async fn back_off(name: &str, error: &Error, failures: u64, delay: Duration) {
    if error.is_transient() {
        tracing::warn!(
            sink = name,
            error = %error,
            failures,
            retry_in_secs = delay.as_secs(),
            "Sink failed, restarting after delay"
        );
    } else {
        tracing::error!(
            sink = name,
            error = %error,
            failures,
            retry_in_secs = delay.as_secs(),
            "Sink failed with a non-transient error, restarting after delay"
        );
    }
    tokio::time::sleep(delay).await;
}

/// Wraps a [`Sink`] so its failures restart it instead of ending the process.
pub struct Retrying<S> {
    inner: S,
    broadcaster: Broadcaster,
    delay: Duration,
}

impl<S: Sink> Retrying<S> {
    /// `broadcaster` supplies the fresh subscription for each restart.
    pub fn new(inner: S, broadcaster: Broadcaster, delay: Duration) -> Self {
        Self {
            inner,
            broadcaster,
            delay,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: Sink> Sink for Retrying<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn run(&mut self, subscription: Subscription) -> Result<()> {
        let name = self.inner.name();
        let mut subscription = Some(subscription);
        let mut failures: u64 = 0;

        loop {
            let sub = subscription
                .take()
                .unwrap_or_else(|| self.broadcaster.subscribe());

            match self.inner.run(sub).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    failures += 1;
                    back_off(name, &e, failures, self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Snapshot;
    use chrono::Utc;
    use tokio::time::Instant;

    /// Fails the first `failures` runs, then drains one snapshot and succeeds.
    struct FlakySink {
        failures: usize,
        starts: Vec<Instant>,
        received: usize,
    }

    #[async_trait]
    impl Sink for FlakySink {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run(&mut self, mut subscription: Subscription) -> Result<()> {
            self.starts.push(Instant::now());
            if self.starts.len() <= self.failures {
                return Err(Error::Disconnected);
            }
            if subscription.recv().await.is_some() {
                self.received += 1;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_forever_k_failures_then_success() {
        let k = 3;
        let mut calls = 0;
        let mut starts = Vec::new();

        let result = retry_forever("flaky", DEFAULT_RETRY_DELAY, || {
            calls += 1;
            starts.push(Instant::now());
            let outcome = if calls == 1 {
                Err(Error::Auth("token revoked".to_string()))
            } else if calls <= k {
                Err(Error::Broker("boom".to_string()))
            } else {
                Ok(())
            };
            async move { outcome }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls, k + 1);
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_sink_restarts_with_fresh_subscription() {
        let tx = Broadcaster::new();
        let first = tx.subscribe();
        let sink = FlakySink {
            failures: 2,
            starts: Vec::new(),
            received: 0,
        };
        let mut wrapped = Retrying::new(sink, tx.clone(), DEFAULT_RETRY_DELAY);
        assert_eq!(wrapped.name(), "flaky");

        let publisher = {
            let tx = tx.clone();
            tokio::spawn(async move {
                // Land after the second restart at t=10s.
                tokio::time::sleep(Duration::from_secs(11)).await;
                tx.publish(Snapshot::new(b"{}".to_vec(), Utc::now(), false, false));
            })
        };

        wrapped.run(first).await.unwrap();
        publisher.await.unwrap();

        let sink = wrapped.into_inner();
        assert_eq!(sink.starts.len(), 3);
        assert_eq!(sink.received, 1);
        assert_eq!(sink.starts[1] - sink.starts[0], Duration::from_secs(5));
        assert_eq!(sink.starts[2] - sink.starts[1], Duration::from_secs(5));
        // Only the live subscription remains registered.
        assert!(tx.subscriber_count() <= 1);
    }
}
