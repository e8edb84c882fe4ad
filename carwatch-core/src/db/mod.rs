//! Database layer for carwatch
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - An append-only snapshot log
//! - The [`SnapshotStore`] seam the persistence sink writes through

pub mod repo;
pub mod schema;

pub use repo::{Database, StoredSnapshot};

use crate::error::Result;
use crate::types::Snapshot;

/// Durable destination for snapshots.
///
/// Implementations are blocking; the persistence sink calls them from
/// `spawn_blocking`.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Create tables if needed. Safe to call on every startup.
    fn ensure_schema(&self) -> Result<()>;

    /// Durably record one snapshot. Failures are [`Error::Storage`](crate::Error::Storage).
    fn append(&self, snapshot: &Snapshot) -> Result<()>;
}
