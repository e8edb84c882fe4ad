use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Subscription;
use crate::db::SnapshotStore;
use crate::error::{Error, Result};

use super::Sink;

/// Durably records every snapshot, one write per snapshot, in delivery order.
pub struct PersistSink<S> {
    store: Arc<S>,
    written: u64,
}

impl<S: SnapshotStore> PersistSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, written: 0 }
    }

    /// Snapshots written since this sink was created
    pub fn written(&self) -> u64 {
        self.written
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| Error::Storage(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl<S: SnapshotStore> Sink for PersistSink<S> {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn run(&mut self, mut subscription: Subscription) -> Result<()> {
        self.blocking(|store| store.ensure_schema()).await?;
        tracing::info!("Persistence sink ready");

        while let Some(snapshot) = subscription.recv().await {
            let timestamp = snapshot.timestamp();
            self.blocking(move |store: &S| store.append(&snapshot))
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, %timestamp, "Failed to persist snapshot");
                    e
                })?;
            self.written += 1;
            tracing::debug!(%timestamp, written = self.written, "Persisted snapshot");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Broadcaster;
    use crate::db::Database;
    use crate::types::Snapshot;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FailingStore {
        appended: Mutex<usize>,
        fail_after: usize,
    }

    impl SnapshotStore for FailingStore {
        fn ensure_schema(&self) -> Result<()> {
            Ok(())
        }

        fn append(&self, _snapshot: &Snapshot) -> Result<()> {
            let mut n = self.appended.lock().unwrap();
            if *n >= self.fail_after {
                return Err(Error::Storage("disk full".to_string()));
            }
            *n += 1;
            Ok(())
        }
    }

    fn snapshot(n: u8) -> Snapshot {
        Snapshot::new(vec![n], Utc::now(), false, false)
    }

    #[tokio::test]
    async fn test_persists_in_delivery_order() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let tx = Broadcaster::new();
        let sub = tx.subscribe();
        for n in 0..3 {
            tx.publish(snapshot(n));
        }
        drop(tx);

        let mut sink = PersistSink::new(Arc::clone(&db));
        sink.run(sub).await.unwrap();

        assert_eq!(sink.written(), 3);
        let rows = db.recent_snapshots(10).unwrap();
        let payloads: Vec<u8> = rows.iter().map(|r| r.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_storage_failure_ends_the_sink() {
        let store = Arc::new(FailingStore {
            fail_after: 1,
            ..Default::default()
        });
        let tx = Broadcaster::new();
        let sub = tx.subscribe();
        tx.publish(snapshot(0));
        tx.publish(snapshot(1));
        tx.publish(snapshot(2));

        let mut sink = PersistSink::new(store);
        let err = sink.run(sub).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(sink.written(), 1);
    }
}
