//! Ordered key-value backend over a [`LogStore`].

use super::{Storage, StorageContext};
use crate::config::ScanConfig;
use crate::error::{CoreError, CoreResult};
use crate::iterator::{Delivery, IteratorFeed, RecordIterator};
use crate::query::Query;
use crate::record::{envelope, share, unix_now, Record, SharedRecord, Wrapper};
use crate::signal::Signal;
use recdb_storage::{Device, FileDevice, LogStore, MemoryDevice};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File name of the record log inside a database location.
const LOG_FILE: &str = "records.log";

/// Compaction threshold for [`Storage::maintain`].
const COMPACT_DEAD_RATIO: f64 = 0.5;

/// A backend storing envelopes in an append-only log with an ordered
/// in-memory index.
///
/// Registered as `memory` over a [`MemoryDevice`] and as `log` over a
/// [`FileDevice`] at `<location>/records.log`.
pub struct KvStorage<D: Device> {
    name: String,
    log: LogStore<D>,
    scan: ScanConfig,
    shutdown: Signal,
}

impl KvStorage<MemoryDevice> {
    /// Opens a non-persistent backend.
    pub fn memory(ctx: &StorageContext) -> CoreResult<Self> {
        Self::open(ctx, MemoryDevice::new())
    }
}

impl KvStorage<FileDevice> {
    /// Opens the persistent backend in `ctx.location`.
    pub fn open_log(ctx: &StorageContext) -> CoreResult<Self> {
        let device = FileDevice::open_with_create_dirs(&ctx.location.join(LOG_FILE))?;
        Self::open(ctx, device)
    }
}

impl<D: Device + 'static> KvStorage<D> {
    /// Opens a backend over any device, replaying its log.
    pub fn open(ctx: &StorageContext, device: D) -> CoreResult<Self> {
        let log = LogStore::open(device)?;
        debug!(database = %ctx.name, records = log.len(), "opened kv storage");
        Ok(Self {
            name: ctx.name.clone(),
            log,
            scan: ctx.scan,
            shutdown: ctx.shutdown.clone(),
        })
    }

    /// Number of stored keys, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    async fn scan(
        &self,
        query: &Query,
        local: bool,
        internal: bool,
        feed: &mut IteratorFeed,
    ) -> CoreResult<()> {
        let prefix = query.database_key_prefix().as_bytes();
        let batch_size = self.scan.batch_size.max(1);
        let mut after: Option<Vec<u8>> = None;

        loop {
            if feed.is_stopped() {
                return stopped(feed);
            }
            let batch = self.log.scan(prefix, after.as_deref(), batch_size)?;
            let exhausted = batch.len() < batch_size;
            match batch.last() {
                Some((last, _)) => after = Some(last.clone()),
                None => return Ok(()),
            }

            for (key, value) in batch {
                let record = String::from_utf8(key)
                    .map_err(|e| {
                        CoreError::invalid_record(format!(
                            "{}:{}: key is not valid utf-8",
                            self.name,
                            String::from_utf8_lossy(e.as_bytes())
                        ))
                    })
                    .and_then(|db_key| Wrapper::new_raw(&self.name, &db_key, &value));
                let mut record = match record {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(database = %self.name, error = %err, "skipping unreadable record");
                        if feed.warn(err).await? == Delivery::Stopped {
                            return stopped(feed);
                        }
                        continue;
                    }
                };
                let visible = record
                    .meta()
                    .is_some_and(|m| m.check_validity() && m.check_permission(local, internal));
                if !visible || !query.matches_record(&mut record) {
                    continue;
                }
                if feed.send(share(record)).await? == Delivery::Stopped {
                    return stopped(feed);
                }
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    fn compact(&self) -> CoreResult<()> {
        let stats = self.log.compact(|_, _| true)?;
        info!(
            database = %self.name,
            kept = stats.kept,
            reclaimed = stats.reclaimed_bytes,
            "compacted kv storage"
        );
        Ok(())
    }
}

fn stopped(feed: &IteratorFeed) -> CoreResult<()> {
    if feed.is_shutting_down() {
        Err(CoreError::ShuttingDown)
    } else {
        Ok(())
    }
}

impl<D: Device + 'static> Storage for KvStorage<D> {
    fn get(&self, key: &str) -> CoreResult<SharedRecord> {
        let data = self.log.get(key.as_bytes())?.ok_or(CoreError::NotFound)?;
        Ok(share(Wrapper::new_raw(&self.name, key, &data)?))
    }

    fn put(&self, record: &dyn Record) -> CoreResult<()> {
        let data = record.marshal_record()?;
        self.log.put(record.base().database_key().as_bytes(), &data)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> CoreResult<()> {
        self.log.remove(key.as_bytes())?;
        Ok(())
    }

    fn query(
        self: Arc<Self>,
        query: Query,
        local: bool,
        internal: bool,
    ) -> CoreResult<RecordIterator> {
        query.check()?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| CoreError::no_runtime("query scans run on a tokio runtime"))?;
        let (iter, mut feed) = RecordIterator::channel(&self.scan, self.shutdown.clone());

        handle.spawn(async move {
            let result = self.scan(&query, local, internal, &mut feed).await;
            if let Err(err) = &result {
                warn!(database = %self.name, query = %query, error = %err, "query scan failed");
            }
            feed.finish(result);
        });
        Ok(iter)
    }

    fn maintain(&self) -> CoreResult<()> {
        let stats = self.log.stats()?;
        if stats.dead_ratio() > COMPACT_DEAD_RATIO {
            self.compact()?;
        }
        Ok(())
    }

    fn maintain_thorough(&self) -> CoreResult<()> {
        self.compact()
    }

    fn maintain_record_states(&self, purge_deleted_before: i64) -> CoreResult<()> {
        let now = unix_now();
        let batch_size = self.scan.batch_size.max(1);
        let mut expired = Vec::new();
        let mut purge = Vec::new();
        let mut after: Option<Vec<u8>> = None;

        loop {
            let batch = self.log.scan(b"", after.as_deref(), batch_size)?;
            let exhausted = batch.len() < batch_size;
            match batch.last() {
                Some((last, _)) => after = Some(last.clone()),
                None => break,
            }
            for (key, value) in batch {
                let Ok(env) = envelope::unpack(&value) else {
                    continue;
                };
                if env.meta.is_deleted() {
                    if env.meta.deleted < purge_deleted_before {
                        purge.push(key);
                    }
                } else if !env.meta.is_valid_at(now) {
                    expired.push((key, env.meta));
                }
            }
            if exhausted {
                break;
            }
        }

        for (key, mut meta) in expired.iter().cloned() {
            meta.deleted = now;
            self.log.put(&key, &envelope::pack(&meta, &[])?)?;
        }
        for key in &purge {
            self.log.remove(key)?;
        }
        if !expired.is_empty() || !purge.is_empty() {
            info!(
                database = %self.name,
                expired = expired.len(),
                purged = purge.len(),
                "updated record states"
            );
        }
        Ok(())
    }

    fn shutdown(&self) -> CoreResult<()> {
        self.log.close()?;
        debug!(database = %self.name, "kv storage closed");
        Ok(())
    }
}

impl<D: Device> std::fmt::Debug for KvStorage<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStorage")
            .field("name", &self.name)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
