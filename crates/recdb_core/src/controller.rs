//! Per-database controller.
//!
//! A controller owns one storage backend and serializes writes to it
//! through a commit lock, so subscribers observe writes in commit order.

use crate::error::{CoreError, CoreResult};
use crate::iterator::RecordIterator;
use crate::query::Query;
use crate::record::{share, Record, SharedRecord, Wrapper};
use crate::registry::DatabaseInfo;
use crate::signal::Signal;
use crate::storage::Storage;
use crate::subscription::{Push, Subscription, SubscriptionSink};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owner of one database backend.
pub struct Controller {
    name: String,
    storage_type: String,
    read_only: bool,
    storage: Arc<dyn Storage>,
    subscriptions: Mutex<Vec<SubscriptionSink>>,
    commit: Mutex<()>,
    generation: AtomicU64,
    shutdown: Signal,
    subscription_capacity: usize,
}

impl Controller {
    /// Creates a controller for a registered database.
    #[must_use]
    pub fn new(
        info: &DatabaseInfo,
        storage: Arc<dyn Storage>,
        shutdown: Signal,
        subscription_capacity: usize,
    ) -> Self {
        let read_only = info.read_only || storage.read_only();
        info!(
            database = %info.name,
            storage_type = %info.storage_type,
            read_only,
            "controller started"
        );
        Self {
            name: info.name.clone(),
            storage_type: info.storage_type.clone(),
            read_only,
            storage,
            subscriptions: Mutex::new(Vec::new()),
            commit: Mutex::new(()),
            generation: AtomicU64::new(0),
            shutdown,
            subscription_capacity,
        }
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage type the backend was built from.
    #[must_use]
    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    /// Whether writes are rejected.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the backend is injected.
    #[must_use]
    pub fn injected(&self) -> bool {
        self.storage.injected()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Write generation. Advances with every write that reaches the
    /// backend, so a record read at one generation is current for as long
    /// as the generation stays the same.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the valid record stored under the database key `key`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the record is absent, deleted or expired.
    pub fn get(&self, key: &str) -> CoreResult<SharedRecord> {
        self.check_running()?;
        let record = self.storage.get(key)?;
        let valid = record.lock().meta().is_some_and(|m| m.check_validity());
        if !valid {
            return Err(CoreError::NotFound);
        }
        Ok(record)
    }

    /// Persists `record` and notifies matching subscribers.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`] during shutdown, [`CoreError::ReadOnly`]
    /// for read-only databases, or the backend's error.
    pub fn put(&self, record: &dyn Record) -> CoreResult<()> {
        self.commit(record).map(|_| ())
    }

    /// Like [`Controller::put`], returning the generation the write
    /// committed at.
    pub fn commit(&self, record: &dyn Record) -> CoreResult<u64> {
        self.check_running()?;
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }

        let _commit = self.commit.lock();
        let previous = if self.subscriptions.lock().is_empty() {
            None
        } else {
            self.storage.get(record.base().database_key()).ok()
        };
        let result = self.storage.put(record);
        let generation = self.advance();
        result?;
        self.notify(record, previous);
        Ok(generation)
    }

    /// Physically removes a key without notifying subscribers.
    pub fn purge(&self, key: &str) -> CoreResult<()> {
        self.check_running()?;
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }
        let _commit = self.commit.lock();
        let result = self.storage.delete(key);
        self.advance();
        result
    }

    /// Starts a scan.
    pub fn query(&self, query: Query, local: bool, internal: bool) -> CoreResult<RecordIterator> {
        self.check_running()?;
        self.check_query(&query)?;
        Arc::clone(&self.storage).query(query, local, internal)
    }

    /// Registers a live change feed.
    pub fn subscribe(
        self: &Arc<Self>,
        query: Query,
        local: bool,
        internal: bool,
    ) -> CoreResult<Subscription> {
        self.check_running()?;
        self.check_query(&query)?;
        let (subscription, sink) = Subscription::channel(
            query,
            local,
            internal,
            self.subscription_capacity,
            Arc::downgrade(self),
        );
        debug!(database = %self.name, id = %sink.id, query = %sink.query, "subscribed");
        self.subscriptions.lock().push(sink);
        Ok(subscription)
    }

    /// Registers a subscription and starts a scan for the same query, with
    /// no write committing in between.
    pub fn query_subscribe(
        self: &Arc<Self>,
        query: Query,
        local: bool,
        internal: bool,
    ) -> CoreResult<(RecordIterator, Subscription)> {
        let _commit = self.commit.lock();
        let subscription = self.subscribe(query.clone(), local, internal)?;
        let iter = self.query(query, local, internal)?;
        Ok((iter, subscription))
    }

    /// Returns once every write that committed before the call has been
    /// delivered to subscribers.
    pub fn barrier(&self) {
        drop(self.commit.lock());
    }

    pub(crate) fn unsubscribe(&self, id: Uuid) {
        self.subscriptions.lock().retain(|sink| sink.id != id);
        debug!(database = %self.name, %id, "unsubscribed");
    }

    /// Cheap backend upkeep.
    pub fn maintain(&self) -> CoreResult<()> {
        self.storage.maintain()
    }

    /// Expensive backend compaction.
    pub fn maintain_thorough(&self) -> CoreResult<()> {
        self.storage.maintain_thorough()
    }

    /// Expires and purges records, see [`Storage::maintain_record_states`].
    pub fn maintain_record_states(&self, purge_deleted_before: i64) -> CoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        let _commit = self.commit.lock();
        let result = self.storage.maintain_record_states(purge_deleted_before);
        self.advance();
        result
    }

    /// Ends all subscriptions and shuts the backend down.
    pub fn shutdown(&self) -> CoreResult<()> {
        let _commit = self.commit.lock();
        for sink in self.subscriptions.lock().drain(..) {
            sink.fail(CoreError::ShuttingDown);
        }
        self.storage.shutdown()?;
        info!(database = %self.name, "controller stopped");
        Ok(())
    }

    /// Must be called with the commit lock held.
    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn check_running(&self) -> CoreResult<()> {
        if self.shutdown.is_fired() {
            return Err(CoreError::ShuttingDown);
        }
        Ok(())
    }

    fn check_query(&self, query: &Query) -> CoreResult<()> {
        query.check()?;
        if query.database_name() != self.name {
            return Err(CoreError::invalid_query(format!(
                "query for {} sent to database {}",
                query.database_name(),
                self.name
            )));
        }
        Ok(())
    }

    /// Delivers a committed write to every subscriber allowed to see it
    /// whose query matched the record before or after the write.
    fn notify(&self, record: &dyn Record, previous: Option<SharedRecord>) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.is_empty() {
            return;
        }

        let base = record.base();
        let snapshot = record
            .marshal_record()
            .and_then(|data| Wrapper::new_raw(base.database_name(), base.database_key(), &data));
        let mut current = match snapshot {
            Ok(current) => current,
            Err(err) => {
                warn!(database = %self.name, key = %base.key(), error = %err, "could not snapshot record for subscribers");
                return;
            }
        };
        let Some(meta) = current.meta().copied() else {
            return;
        };
        let shared = share(current.clone());

        subscriptions.retain(|sink| {
            if !meta.check_permission(sink.local, sink.internal)
                || !sink.query.matches_key(current.base().database_key())
            {
                return true;
            }
            let matches = sink.query.matches_record(&mut current)
                || previous
                    .as_ref()
                    .is_some_and(|prev| sink.query.matches_record(&mut *prev.lock()));
            if !matches {
                return true;
            }
            match sink.push(Arc::clone(&shared)) {
                Push::Delivered => true,
                Push::Overflowed => {
                    warn!(database = %self.name, id = %sink.id, "subscription overflowed, dropping it");
                    false
                }
                Push::Closed => false,
            }
        });
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("storage_type", &self.storage_type)
            .field("read_only", &self.read_only)
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}
