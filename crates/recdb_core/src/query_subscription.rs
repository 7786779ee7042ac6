//! Query-then-subscribe.
//!
//! The subscription is registered before the scan starts, so every write
//! that commits while the scan runs reaches the feed. Some of those writes
//! are also seen by the scan. When the scan ends, the feed is drained up to
//! the current commit point and, per key, events up to and including the
//! version the snapshot emitted are dropped. The remaining events follow
//! in order, then the live feed.

use crate::error::{CoreError, CoreResult};
use crate::iterator::{RecordIterator, Scanned};
use crate::record::SharedRecord;
use crate::subscription::{Change, Subscription};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

/// An event of a [`QuerySubscription`].
#[derive(Debug)]
pub enum QsubEvent {
    /// A record of the initial scan.
    Snapshot(SharedRecord),
    /// A stored entry the initial scan could not read.
    Warning(CoreError),
    /// The initial scan is complete.
    SnapshotDone,
    /// A live change after the snapshot.
    Change(Change),
}

/// A scan followed without gap or repetition by its live change feed.
#[derive(Debug)]
pub struct QuerySubscription {
    iter: Option<RecordIterator>,
    subscription: Subscription,
    emitted: HashMap<String, [u8; 32]>,
    backlog: VecDeque<SharedRecord>,
}

impl QuerySubscription {
    pub(crate) fn new(iter: RecordIterator, subscription: Subscription) -> Self {
        Self {
            iter: Some(iter),
            subscription,
            emitted: HashMap::new(),
            backlog: VecDeque::new(),
        }
    }

    /// The underlying subscription.
    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Whether the snapshot phase is over.
    #[must_use]
    pub fn snapshot_done(&self) -> bool {
        self.iter.is_none()
    }

    /// Receives the next event. `Ok(None)` ends the stream.
    ///
    /// # Errors
    ///
    /// The scan's error if it failed, or the feed's terminal error.
    pub async fn next(&mut self) -> CoreResult<Option<QsubEvent>> {
        if let Some(iter) = self.iter.as_mut() {
            match iter.next_item().await {
                Some(Scanned::Record(record)) => {
                    if let Some((key, digest)) = digest(&record) {
                        self.emitted.insert(key, digest);
                    }
                    return Ok(Some(QsubEvent::Snapshot(record)));
                }
                Some(Scanned::Warning(err)) => return Ok(Some(QsubEvent::Warning(err))),
                None => {}
            }
            let err = iter.take_err();
            self.iter = None;
            if let Some(err) = err {
                self.subscription.cancel();
                return Err(err);
            }
            self.drain_overlap();
            return Ok(Some(QsubEvent::SnapshotDone));
        }

        if let Some(record) = self.backlog.pop_front() {
            return Ok(Some(QsubEvent::Change(Change::new(record))));
        }
        match self.subscription.next_change().await {
            Some(change) => Ok(Some(QsubEvent::Change(change))),
            None => match self.subscription.take_err() {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }

    /// Stops the scan and the feed.
    pub fn cancel(&self) {
        if let Some(iter) = &self.iter {
            iter.cancel();
        }
        self.subscription.cancel();
    }

    fn drain_overlap(&mut self) {
        self.subscription.barrier();
        let mut pending = Vec::new();
        while let Some(record) = self.subscription.try_recv() {
            pending.push(record);
        }

        let keyed: Vec<_> = pending
            .into_iter()
            .map(|record| (digest(&record), record))
            .collect();

        // last pending index per key that carries the version the snapshot emitted
        let mut cutoff: HashMap<&str, usize> = HashMap::new();
        for (i, (entry, _)) in keyed.iter().enumerate() {
            if let Some((key, digest)) = entry {
                if self.emitted.get(key) == Some(digest) {
                    cutoff.insert(key.as_str(), i);
                }
            }
        }

        let mut kept = VecDeque::with_capacity(keyed.len());
        for (i, (entry, record)) in keyed.iter().enumerate() {
            let skip = entry
                .as_ref()
                .and_then(|(key, _)| cutoff.get(key.as_str()))
                .is_some_and(|&last| i <= last);
            if !skip {
                kept.push_back(record.clone());
            }
        }
        self.backlog = kept;
        self.emitted.clear();
    }
}

fn digest(record: &SharedRecord) -> Option<(String, [u8; 32])> {
    let record = record.lock();
    let data = record.marshal_record().ok()?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(&data));
    Some((record.key(), digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::controller::Controller;
    use crate::query::Query;
    use crate::record::{Record, TypedRecord};
    use crate::registry::DatabaseInfo;
    use crate::signal;
    use crate::storage::{KvStorage, StorageContext};
    use crate::subscription::ChangeKind;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn controller() -> (signal::Trigger, Arc<Controller>) {
        let (trigger, shutdown) = signal::signal();
        let ctx = StorageContext {
            name: "core".into(),
            location: std::env::temp_dir(),
            scan: ScanConfig::default().batch_size(1).iterator_capacity(1),
            shutdown: shutdown.clone(),
        };
        let storage = Arc::new(KvStorage::memory(&ctx).unwrap());
        let info = DatabaseInfo::new("core", "memory");
        (trigger, Arc::new(Controller::new(&info, storage, shutdown, 100)))
    }

    fn put(c: &Controller, key: &str, value: Value, modified: i64) {
        let mut record = TypedRecord::new(key, value);
        record.base_mut().update_meta();
        record.base_mut().meta_mut().unwrap().modified += modified;
        c.put(&record).unwrap();
    }

    #[tokio::test]
    async fn snapshot_then_changes() {
        let (_t, c) = controller();
        put(&c, "core:a", json!({"v": 1}), 0);
        put(&c, "core:b", json!({"v": 1}), 0);

        let (iter, sub) = c.query_subscribe(Query::new("core:"), true, true).unwrap();
        let mut qsub = QuerySubscription::new(iter, sub);

        let mut snapshot = Vec::new();
        loop {
            match qsub.next().await.unwrap().unwrap() {
                QsubEvent::Snapshot(r) => snapshot.push(r.lock().key()),
                QsubEvent::SnapshotDone => break,
                other => panic!("unexpected {other:?} before snapshot end"),
            }
        }
        assert_eq!(snapshot, ["core:a", "core:b"]);
        assert!(qsub.snapshot_done());

        put(&c, "core:a", json!({"v": 2}), 1);
        match qsub.next().await.unwrap().unwrap() {
            QsubEvent::Change(change) => {
                assert_eq!(change.kind, ChangeKind::Update);
                assert_eq!(change.record.lock().key(), "core:a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlap_is_neither_lost_nor_duplicated() {
        let (_t, c) = controller();
        put(&c, "core:a", json!({"v": 1}), 0);
        put(&c, "core:b", json!({"v": 1}), 0);

        let (iter, sub) = c.query_subscribe(Query::new("core:"), true, true).unwrap();
        let mut qsub = QuerySubscription::new(iter, sub);

        // first snapshot record, scan now paused on the single-slot buffer
        let QsubEvent::Snapshot(first) = qsub.next().await.unwrap().unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(first.lock().key(), "core:a");

        // a is already emitted, b and c are ahead of the scan
        put(&c, "core:a", json!({"v": 2}), 1);
        put(&c, "core:b", json!({"v": 2}), 1);
        put(&c, "core:c", json!({"v": 1}), 0);

        let mut seen: Vec<(String, i64)> = Vec::new();
        let mut done = false;
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(2), qsub.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            match event {
                QsubEvent::Snapshot(r) | QsubEvent::Change(Change { record: r, .. }) => {
                    let r = r.lock();
                    let typed = TypedRecord::<Value>::from_record(&*r).unwrap();
                    seen.push((r.key(), typed.data()["v"].as_i64().unwrap()));
                }
                QsubEvent::SnapshotDone => done = true,
                QsubEvent::Warning(err) => panic!("unexpected warning: {err}"),
            }
            if done && seen.len() >= 5 {
                break;
            }
        }

        // every key ends at its latest version, and no version repeats
        let mut versions = seen.clone();
        versions.sort();
        versions.dedup();
        assert_eq!(versions.len(), seen.len(), "duplicate events: {seen:?}");
        for (key, latest) in [("core:a", 2), ("core:b", 2), ("core:c", 1)] {
            let last = seen.iter().rev().find(|(k, _)| k == key).unwrap();
            assert_eq!(last.1, latest, "{seen:?}");
        }
    }
}
