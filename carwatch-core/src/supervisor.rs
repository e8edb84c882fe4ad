//! Task supervision
//!
//! The supervisor owns every long-running task of a pipeline: one producer
//! and one task per sink. The process lives exactly as long as all of them.
//! Whichever finishes first, successfully or not, ends the race; the rest
//! are aborted and joined before [`Supervisor::run_until`] returns.
//!
//! Use [`Supervisor::launch`] to wire a pipeline. It subscribes every sink
//! before the producer starts so the first snapshot reaches all of them.

use std::future::Future;

use tokio::task::{JoinHandle, JoinSet};

use crate::channel::{Broadcaster, Subscription};
use crate::error::{Error, Result};
use crate::sinks::Sink;

/// Name reported when a shutdown signal wins the race
pub const SIGNAL_TASK: &str = "signal";

/// The first task to finish and how it finished.
#[derive(Debug)]
pub struct Exit {
    pub task: &'static str,
    pub result: Result<()>,
}

impl Exit {
    pub fn is_signal(&self) -> bool {
        self.task == SIGNAL_TASK
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs a fixed set of named tasks until the first one finishes.
#[derive(Default)]
pub struct Supervisor {
    tasks: JoinSet<(&'static str, Result<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire `producer` and `sinks` around `tx`.
    ///
    /// Every sink gets its subscription here, before the producer is
    /// spawned.
    pub fn launch<P, Fut>(
        tx: Broadcaster,
        sinks: Vec<Box<dyn Sink>>,
        producer_name: &'static str,
        producer: P,
    ) -> Self
    where
        P: FnOnce(Broadcaster) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let subscribed: Vec<(Box<dyn Sink>, Subscription)> = sinks
            .into_iter()
            .map(|sink| (sink, tx.subscribe()))
            .collect();

        let mut supervisor = Self::new();
        for (sink, subscription) in subscribed {
            supervisor.spawn_sink(sink, subscription);
        }
        supervisor.spawn(producer_name, producer(tx));
        supervisor
    }

    /// Add a named task to the race.
    ///
    /// A panic inside `task` is reported as [`Error::TaskPanicked`] under
    /// the same name.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            // The inner handle lets a panic surface as a JoinError; the guard
            // makes aborting the outer task abort the inner one too.
            let mut guard = AbortOnDrop(tokio::spawn(task));
            let result = match (&mut guard.0).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(Error::TaskPanicked {
                    task: name.to_string(),
                    message: panic_message(e.into_panic()),
                }),
                Err(e) => Err(Error::TaskPanicked {
                    task: name.to_string(),
                    message: e.to_string(),
                }),
            };
            (name, result)
        });
        tracing::debug!(task = name, "Task started");
    }

    /// Run `sink` on `subscription` as a supervised task.
    pub fn spawn_sink(&mut self, mut sink: Box<dyn Sink>, subscription: Subscription) {
        let name = sink.name();
        self.spawn(name, async move { sink.run(subscription).await });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the first task to finish, then tear everything down.
    pub async fn run(self) -> Exit {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), with `shutdown` joining the race.
    pub async fn run_until<S>(mut self, shutdown: S) -> Exit
    where
        S: Future<Output = ()>,
    {
        let exit = tokio::select! {
            joined = self.tasks.join_next() => match joined {
                Some(Ok((task, result))) => Exit { task, result },
                Some(Err(e)) => Exit {
                    task: "supervisor",
                    result: Err(Error::TaskPanicked {
                        task: "supervisor".to_string(),
                        message: e.to_string(),
                    }),
                },
                None => Exit { task: "supervisor", result: Ok(()) },
            },
            _ = shutdown => Exit { task: SIGNAL_TASK, result: Ok(()) },
        };

        match &exit.result {
            Ok(()) if exit.is_signal() => {
                tracing::info!("Shutdown requested, stopping all tasks");
            }
            Ok(()) => {
                tracing::warn!(task = exit.task, "Task finished, stopping all tasks");
            }
            Err(e) => {
                tracing::error!(task = exit.task, error = %e, "Task failed, stopping all tasks");
            }
        }

        let remaining = self.tasks.len();
        self.tasks.shutdown().await;
        tracing::debug!(remaining, "Remaining tasks joined");

        exit
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Snapshot;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Sets a flag when its future is dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Let aborted inner tasks get dropped by the runtime.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    struct CountingSink {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&mut self, mut subscription: Subscription) -> Result<()> {
            while subscription.recv().await.is_some() {
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_exit_wins_and_aborts_the_rest() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut supervisor = Supervisor::new();

        let flag = DropFlag(Arc::clone(&dropped));
        supervisor.spawn("forever", async move {
            let _flag = flag;
            std::future::pending::<()>().await;
            Ok(())
        });
        supervisor.spawn("short", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(Error::Stalled {
                window: Duration::from_secs(10),
            })
        });
        assert_eq!(supervisor.len(), 2);

        let exit = supervisor.run().await;

        assert_eq!(exit.task, "short");
        assert!(matches!(exit.result, Err(Error::Stalled { .. })));
        settle().await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_normal_completion_also_ends_the_race() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("pending", std::future::pending());
        supervisor.spawn("done", async { Ok(()) });

        let exit = supervisor.run().await;
        assert_eq!(exit.task, "done");
        assert!(exit.result.is_ok());
    }

    #[tokio::test]
    async fn test_panic_becomes_task_panicked() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("pending", std::future::pending());
        supervisor.spawn("boom", async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let exit = supervisor.run().await;
        assert_eq!(exit.task, "boom");
        match exit.result {
            Err(Error::TaskPanicked { task, message }) => {
                assert_eq!(task, "boom");
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_joins_the_race() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut supervisor = Supervisor::new();
        let flag = DropFlag(Arc::clone(&dropped));
        supervisor.spawn("forever", async move {
            let _flag = flag;
            std::future::pending::<()>().await;
            Ok(())
        });

        let exit = supervisor
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await;

        assert!(exit.is_signal());
        assert!(exit.result.is_ok());
        settle().await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_supervisor_returns_immediately() {
        let exit = Supervisor::new().run().await;
        assert_eq!(exit.task, "supervisor");
        assert!(exit.result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_subscribes_sinks_before_producer() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(CountingSink { seen: Arc::clone(&seen) }),
            Box::new(CountingSink { seen: Arc::clone(&seen) }),
        ];

        // Held here so the sinks' channel stays open after the producer ends.
        let tx = Broadcaster::new();
        let supervisor = Supervisor::launch(tx.clone(), sinks, "producer", |tx| async move {
            tx.publish(Snapshot::new(b"{}".to_vec(), Utc::now(), false, false));
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        assert_eq!(supervisor.len(), 3);

        let exit = supervisor.run().await;
        assert_eq!(exit.task, "producer");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
