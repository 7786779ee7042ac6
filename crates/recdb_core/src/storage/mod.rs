//! Storage backend contract.

mod kv;
mod registry;

pub use kv::KvStorage;
pub use registry::{StorageContext, StorageFactory, StorageRegistry, INJECTED};

use crate::error::CoreResult;
use crate::iterator::RecordIterator;
use crate::query::Query;
use crate::record::{Record, SharedRecord};
use std::sync::Arc;

/// A pluggable record store behind one database.
///
/// Backends hold records keyed by database key (the part after `name:`)
/// and persist them as envelopes. Each `put` and `delete` is atomic for its
/// key; there are no cross-key transactions.
///
/// # Implementors
///
/// - [`KvStorage`] over a memory or file device
/// - injected backends supplied through [`crate::DatabaseSystem::inject`]
pub trait Storage: Send + Sync + 'static {
    /// Returns the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::NotFound`] if the key is absent. Expired
    /// or deleted records are returned; callers check validity.
    fn get(&self, key: &str) -> CoreResult<SharedRecord>;

    /// Persists the full envelope of `record`.
    ///
    /// # Errors
    ///
    /// Fails if the record has no metadata, cannot be encoded, or the
    /// write fails.
    fn put(&self, record: &dyn Record) -> CoreResult<()>;

    /// Physically removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> CoreResult<()>;

    /// Starts a scan producing every valid, permitted record under the
    /// query's prefix that matches its condition, in key order.
    ///
    /// # Errors
    ///
    /// Fails if the scan cannot be started. Errors during the scan end the
    /// iterator; see [`RecordIterator::err`].
    fn query(self: Arc<Self>, query: Query, local: bool, internal: bool)
        -> CoreResult<RecordIterator>;

    /// Whether the backend rejects writes.
    fn read_only(&self) -> bool {
        false
    }

    /// Whether the backend is synthetic and non-persistent.
    fn injected(&self) -> bool {
        false
    }

    /// Cheap periodic upkeep.
    fn maintain(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Expensive compaction pass.
    fn maintain_thorough(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Converts expired records into tombstones and purges tombstones
    /// deleted before `purge_deleted_before` (Unix seconds).
    fn maintain_record_states(&self, _purge_deleted_before: i64) -> CoreResult<()> {
        Ok(())
    }

    /// Flushes and releases the backend. Later calls may fail.
    fn shutdown(&self) -> CoreResult<()>;
}
