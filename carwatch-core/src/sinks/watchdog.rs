use std::time::Duration;

use async_trait::async_trait;

use crate::channel::Subscription;
use crate::error::{Error, Result};

use super::Sink;

/// Turns prolonged silence on the snapshot stream into a fatal error.
///
/// Every snapshot resets the window. If a full window passes with none,
/// `run` returns [`Error::Stalled`], which the supervisor treats like any
/// other task exit and the binary reports with its own exit status.
pub struct WatchdogSink {
    window: Duration,
}

impl WatchdogSink {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[async_trait]
impl Sink for WatchdogSink {
    fn name(&self) -> &'static str {
        "watchdog"
    }

    async fn run(&mut self, mut subscription: Subscription) -> Result<()> {
        tracing::info!(window_secs = self.window.as_secs(), "Watchdog armed");

        loop {
            match subscription.recv_timeout(self.window).await {
                Ok(Some(snapshot)) => {
                    tracing::trace!(timestamp = %snapshot.timestamp(), "Watchdog reset");
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    tracing::error!(
                        window_secs = self.window.as_secs(),
                        "No snapshot received within watchdog window"
                    );
                    return Err(Error::Stalled {
                        window: self.window,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Broadcaster;
    use crate::types::Snapshot;
    use chrono::Utc;
    use tokio::time::Instant;

    const WINDOW: Duration = Duration::from_secs(1800);

    fn snapshot() -> Snapshot {
        Snapshot::new(b"{}".to_vec(), Utc::now(), false, false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_window_of_silence() {
        let tx = Broadcaster::new();
        let sub = tx.subscribe();
        let started = Instant::now();

        let err = WatchdogSink::new(WINDOW).run(sub).await.unwrap_err();

        assert!(matches!(err, Error::Stalled { window } if window == WINDOW));
        assert_eq!(started.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_traffic_keeps_it_quiet() {
        let tx = Broadcaster::new();
        let sub = tx.subscribe();
        let task = tokio::spawn(async move { WatchdogSink::new(WINDOW).run(sub).await });

        // Idle cadence is 600s; a full day of it never trips an 1800s window.
        for _ in 0..144 {
            tokio::time::sleep(Duration::from_secs(600)).await;
            tx.publish(snapshot());
        }
        tokio::time::sleep(Duration::from_secs(1799)).await;
        assert!(!task.is_finished());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Stalled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_restarts_from_last_snapshot() {
        let tx = Broadcaster::new();
        let sub = tx.subscribe();
        let started = Instant::now();
        let task = tokio::spawn(async move { WatchdogSink::new(WINDOW).run(sub).await });

        tokio::time::sleep(Duration::from_secs(1000)).await;
        tx.publish(snapshot());

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Stalled { .. })));
        assert_eq!(started.elapsed(), Duration::from_secs(1000) + WINDOW);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_quietly() {
        let tx = Broadcaster::new();
        let sub = tx.subscribe();
        drop(tx);
        assert!(WatchdogSink::new(WINDOW).run(sub).await.is_ok());
    }
}
