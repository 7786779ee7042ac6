//! System lifecycle: persistence, registry, injection, read-only
//! databases and shutdown.

mod common;

use common::TestSystem;
use parking_lot::Mutex;
use recdb_core::{
    share, signal, unix_now, CoreError, CoreResult, DatabaseInfo, DatabaseSystem, KvStorage,
    Options, QsubEvent, Query, Record, RecordIterator, ScanConfig, SharedRecord, Storage,
    StorageContext, StorageFactory, TypedRecord, Wrapper,
};
use recdb_storage::MemoryDevice;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn typed(key: &str, data: Value) -> SharedRecord {
    share(TypedRecord::new(key, data))
}

#[test]
fn log_storage_survives_restart() {
    let t = TestSystem::new();
    t.database("core", "log");
    let db = t.interface(Options::trusted());
    db.put_new(&typed("core:keep/a", json!({"n": 1}))).unwrap();
    db.put_new(&typed("core:keep/b", json!({"n": 2}))).unwrap();
    db.delete("core:keep/b").unwrap();
    drop(db);

    let TestSystem { dir, system } = t;
    system.shutdown().unwrap();
    drop(system);

    let system = DatabaseSystem::initialize(common::config(&dir)).unwrap();
    assert_eq!(system.databases(), ["core"]);
    let info = system.database_info("core").unwrap();
    assert_eq!(info.storage_type, "log");
    assert!(info.registered > 0);
    assert!(info.last_loaded > 0);

    let db = recdb_core::Interface::new(Arc::clone(&system), Options::trusted());
    let record = db.get("core:keep/a").unwrap();
    let data = TypedRecord::<Value>::from_record(&*record.lock()).unwrap();
    assert_eq!(data.data(), &json!({"n": 1}));
    assert!(matches!(db.get("core:keep/b"), Err(CoreError::NotFound)));
    system.shutdown().unwrap();
}

#[test]
fn data_directory_is_exclusive() {
    let t = TestSystem::new();
    assert!(matches!(
        DatabaseSystem::initialize(common::config(&t.dir)),
        Err(CoreError::DirectoryLocked)
    ));
}

#[test]
fn registry_rules() {
    let t = TestSystem::new();
    let system = &t.system;

    assert!(matches!(
        system.register(DatabaseInfo::new("ab", "memory")),
        Err(CoreError::InvalidDatabaseName { .. })
    ));
    assert!(matches!(
        system.register(DatabaseInfo::new("bad name", "memory")),
        Err(CoreError::InvalidDatabaseName { .. })
    ));

    let first = system
        .register(DatabaseInfo::new("notes", "memory").description("scratch"))
        .unwrap();
    let second = system
        .register(DatabaseInfo::new("notes", "memory").description("notes"))
        .unwrap();
    assert_eq!(second.registered, first.registered);
    assert_eq!(second.description, "notes");
    assert!(matches!(
        system.register(DatabaseInfo::new("notes", "log")),
        Err(CoreError::InvalidOperation { .. })
    ));

    assert!(matches!(
        system.controller("missing"),
        Err(CoreError::UnknownDatabase { .. })
    ));
    system.register(DatabaseInfo::new("exotic", "nosuchtype")).unwrap();
    assert!(matches!(
        system.controller("exotic"),
        Err(CoreError::UnknownStorage { .. })
    ));
}

#[test]
fn registry_is_flushed_in_the_background() {
    let t = TestSystem::new();
    t.database("core", "memory");
    let path = t.dir.path().join("databases.json");

    let mut flushed = false;
    for _ in 0..100 {
        if let Ok(data) = std::fs::read(&path) {
            let entries: BTreeMap<String, DatabaseInfo> = serde_json::from_slice(&data).unwrap();
            if entries.contains_key("core") {
                flushed = true;
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(flushed);
}

#[test]
fn read_only_databases_reject_writes() {
    let t = TestSystem::new();
    t.system
        .register(DatabaseInfo::new("frozen", "memory").read_only(true))
        .unwrap();
    let db = t.interface(Options::trusted());

    assert!(matches!(
        db.put_new(&typed("frozen:a", json!({}))),
        Err(CoreError::ReadOnly)
    ));
    assert!(matches!(db.delete("frozen:a"), Err(CoreError::ReadOnly)));
    assert!(matches!(db.get("frozen:a"), Err(CoreError::NotFound)));
}

#[derive(Default)]
struct StaticStorage {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_shutdowns: AtomicUsize,
    closed: AtomicBool,
}

impl StaticStorage {
    /// A storage whose first `n` shutdowns fail.
    fn failing_shutdowns(n: usize) -> Self {
        Self {
            failing_shutdowns: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn wrapper(key: &str, data: &[u8]) -> CoreResult<Wrapper> {
        Wrapper::new_raw("status", key, data)
    }
}

impl Storage for StaticStorage {
    fn get(&self, key: &str) -> CoreResult<SharedRecord> {
        let records = self.records.lock();
        let data = records.get(key).ok_or(CoreError::NotFound)?;
        Ok(share(Self::wrapper(key, data)?))
    }

    fn put(&self, record: &dyn Record) -> CoreResult<()> {
        let data = record.marshal_record()?;
        self.records
            .lock()
            .insert(record.base().database_key().to_owned(), data);
        Ok(())
    }

    fn delete(&self, key: &str) -> CoreResult<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    fn query(self: Arc<Self>, query: Query, _local: bool, _internal: bool) -> CoreResult<RecordIterator> {
        let (trigger, shutdown) = signal();
        let (iter, mut feed) = RecordIterator::channel(&ScanConfig::default(), shutdown);
        let matching: Vec<_> = self
            .records
            .lock()
            .iter()
            .filter(|(key, _)| query.matches_key(key))
            .filter_map(|(key, data)| Self::wrapper(key, data).ok())
            .collect();
        tokio::spawn(async move {
            let _trigger = trigger;
            for record in matching {
                if feed.send(share(record)).await.is_err() {
                    break;
                }
            }
            feed.finish(Ok(()));
        });
        Ok(iter)
    }

    fn injected(&self) -> bool {
        true
    }

    fn shutdown(&self) -> CoreResult<()> {
        let fail = self
            .failing_shutdowns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CoreError::invalid_operation("storage is busy"));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn injected_storage() {
    let t = TestSystem::new();
    t.system
        .register(DatabaseInfo::new("status", recdb_core::storage::INJECTED))
        .unwrap();
    assert!(matches!(
        t.system.controller("status"),
        Err(CoreError::InvalidOperation { .. })
    ));

    t.database("plain", "memory");
    assert!(t
        .system
        .inject("plain", Arc::new(StaticStorage::default()))
        .is_err());

    let controller = t.system.inject("status", Arc::new(StaticStorage::default())).unwrap();
    assert!(controller.injected());
    assert!(t
        .system
        .inject("status", Arc::new(StaticStorage::default()))
        .is_err());

    let db = t.interface(Options::trusted());
    db.put_new(&typed("status:uptime", json!({"s": 10}))).unwrap();
    assert!(db.exists("status:uptime").unwrap());
    let found = db.query(Query::new("status:")).unwrap().collect().await.unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn shutdown_stops_at_the_first_failure_then_resumes() {
    let t = TestSystem::new();
    let mut storages = Vec::new();
    for (name, failures) in [("first", 0), ("second", 1), ("third", 0)] {
        t.system
            .register(DatabaseInfo::new(name, recdb_core::storage::INJECTED))
            .unwrap();
        let storage = Arc::new(StaticStorage::failing_shutdowns(failures));
        t.system.inject(name, Arc::clone(&storage) as Arc<dyn Storage>).unwrap();
        storages.push(storage);
    }

    let err = t.system.shutdown().unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
    assert!(t.system.is_shutting_down());
    assert!(storages[0].is_closed());
    assert!(!storages[1].is_closed());
    assert!(!storages[2].is_closed());

    t.system.shutdown().unwrap();
    assert!(storages.iter().all(|s| s.is_closed()));
}

#[test]
fn custom_storage_types() {
    let t = TestSystem::new();
    let factory: StorageFactory = Arc::new(|ctx: &StorageContext| {
        Ok(Arc::new(KvStorage::memory(ctx)?) as Arc<dyn Storage>)
    });
    t.system.register_storage("scratch", Arc::clone(&factory)).unwrap();
    assert!(t.system.register_storage("scratch", Arc::clone(&factory)).is_err());
    assert!(t.system.register_storage("injected", factory).is_err());

    t.database("temp", "scratch");
    let db = t.interface(Options::trusted());
    db.put_new(&typed("temp:a", json!(1))).unwrap();
    assert!(db.exists("temp:a").unwrap());
}

#[tokio::test]
async fn query_subscribe_hands_over_to_live_changes() {
    let t = TestSystem::new();
    t.database("core", "memory");
    let db = t.interface(Options::trusted());
    db.put_new(&typed("core:q/a", json!({"v": 1}))).unwrap();
    db.put_new(&typed("core:q/b", json!({"v": 2}))).unwrap();

    let mut qsub = db.query_subscribe(Query::new("core:q/")).unwrap();
    let mut snapshot = Vec::new();
    loop {
        match qsub.next().await.unwrap().unwrap() {
            QsubEvent::Snapshot(record) => snapshot.push(record.lock().key()),
            QsubEvent::SnapshotDone => break,
            other => panic!("unexpected {other:?} before snapshot end"),
        }
    }
    assert_eq!(snapshot, ["core:q/a", "core:q/b"]);
    assert!(qsub.snapshot_done());

    db.insert_value("core:q/a", "v", json!(3)).unwrap();
    match qsub.next().await.unwrap().unwrap() {
        QsubEvent::Change(change) => assert_eq!(change.record.lock().key(), "core:q/a"),
        other => panic!("expected change, got {other:?}"),
    }
    qsub.cancel();
}

#[test]
fn record_states_are_maintained() {
    let t = TestSystem::new();
    let captured: Arc<Mutex<Option<Arc<KvStorage<MemoryDevice>>>>> = Arc::default();
    let slot = Arc::clone(&captured);
    let factory: StorageFactory = Arc::new(move |ctx: &StorageContext| {
        let storage = Arc::new(KvStorage::memory(ctx)?);
        *slot.lock() = Some(Arc::clone(&storage));
        Ok(storage as Arc<dyn Storage>)
    });
    t.system.register_storage("tracked", factory).unwrap();
    t.database("core", "tracked");

    let db = t.interface(Options::trusted());
    db.put_new(&typed("core:r/live", json!({}))).unwrap();
    db.put_new(&typed("core:r/stale", json!({}))).unwrap();
    db.set_absolute_expiry("core:r/stale", unix_now() - 5).unwrap();
    let storage = captured.lock().clone().unwrap();

    t.system.maintain_record_states(0).unwrap();
    let tombstone = storage.get("r/stale").unwrap();
    assert!(tombstone.lock().meta().unwrap().is_deleted());
    assert_eq!(storage.len(), 2);

    t.system.maintain_record_states(unix_now() + 1).unwrap();
    assert!(matches!(storage.get("r/stale"), Err(CoreError::NotFound)));
    assert!(db.exists("core:r/live").unwrap());
    t.system.maintain().unwrap();
    t.system.maintain_thorough().unwrap();
}

#[tokio::test]
async fn shutdown_ends_feeds_and_rejects_work() {
    let t = TestSystem::new();
    t.database("core", "log");
    let db = t.interface(Options::trusted());
    db.put_new(&typed("core:s/a", json!({}))).unwrap();
    let mut sub = db.subscribe(Query::new("core:s/")).unwrap();

    t.system.shutdown().unwrap();
    assert!(t.system.is_shutting_down());

    assert!(sub.recv().await.is_none());
    assert!(matches!(sub.err(), Some(CoreError::ShuttingDown)));
    assert!(matches!(db.get("core:s/a"), Err(CoreError::ShuttingDown)));
    assert!(matches!(
        db.put_new(&typed("core:s/b", json!({}))),
        Err(CoreError::ShuttingDown)
    ));
    // a second shutdown has nothing left to do
    t.system.shutdown().unwrap();
}
