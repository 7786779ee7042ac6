//! The caching, permission-checking entry point to all databases.

use crate::cache::ArcCache;
use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::iterator::RecordIterator;
use crate::options::Options;
use crate::query::Query;
use crate::query_subscription::QuerySubscription;
use crate::record::{parse_key, Record, SharedRecord};
use crate::subscription::Subscription;
use crate::system::DatabaseSystem;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Access to every registered database under one [`Options`] policy.
///
/// Keys are composite, `name:key`. Reads check the caller's permission and
/// hide deleted or expired records; writes stamp metadata and apply the
/// policy before persisting. With a cache configured, reads and successful
/// writes populate it. An entry is only served while its database has seen
/// no write since it was cached, through this or any other interface; a
/// hit is still checked for permission and validity, and a miss always
/// falls through to the backend.
///
/// ```no_run
/// use recdb_core::{share, Config, DatabaseInfo, DatabaseSystem, Interface, Options, TypedRecord};
/// use serde_json::json;
///
/// let system = DatabaseSystem::initialize(Config::new("data")).unwrap();
/// system.register(DatabaseInfo::new("core", "log")).unwrap();
///
/// let db = Interface::new(system, Options::trusted().cache_size(256));
/// db.put_new(&share(TypedRecord::new("core:settings/theme", json!({"dark": true})))).unwrap();
/// assert!(db.exists("core:settings/theme").unwrap());
/// ```
#[derive(Debug)]
pub struct Interface {
    system: Arc<DatabaseSystem>,
    options: Options,
    cache: Option<Mutex<ArcCache<String, Cached>>>,
}

/// A cached record and the write generation of its database when it was
/// read or written.
#[derive(Debug, Clone)]
struct Cached {
    record: SharedRecord,
    generation: u64,
}

impl Interface {
    /// Creates an interface. A non-zero `options.cache_size` enables the
    /// cache.
    #[must_use]
    pub fn new(system: Arc<DatabaseSystem>, options: Options) -> Self {
        let cache = (options.cache_size > 0)
            .then(|| Mutex::new(ArcCache::new(options.cache_size, options.cache_expiration)));
        Self {
            system,
            options,
            cache,
        }
    }

    /// The policy in effect.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The database system.
    #[must_use]
    pub fn system(&self) -> &Arc<DatabaseSystem> {
        &self.system
    }

    /// Whether a valid record exists under `key`. Does not check
    /// permission.
    pub fn exists(&self, key: &str) -> CoreResult<bool> {
        let (name, db_key) = parse_key(key);
        let controller = self.system.controller(name)?;
        if self.cached(&controller, key).is_some() {
            return Ok(true);
        }
        match controller.get(db_key) {
            Ok(_) => Ok(true),
            Err(CoreError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Returns the record under `key`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if it is absent, deleted or expired,
    /// [`CoreError::PermissionDenied`] if the caller may not see it.
    pub fn get(&self, key: &str) -> CoreResult<SharedRecord> {
        let (name, db_key) = parse_key(key);
        let controller = self.system.controller(name)?;
        if let Some(cached) = self.cached(&controller, key) {
            self.check_permission(&cached)?;
            return Ok(cached);
        }

        let generation = controller.generation();
        let record = controller.get(db_key)?;
        self.check_permission(&record)?;
        self.cache(key, &record, generation);
        Ok(record)
    }

    /// Writes `record`, applying the policy to its metadata.
    ///
    /// Overwriting a record the caller may not see is denied.
    pub fn put(&self, record: &SharedRecord) -> CoreResult<()> {
        self.write(record, false)
    }

    /// Writes `record` as a new record: its metadata is reset first, so
    /// creation and modification times are fresh.
    pub fn put_new(&self, record: &SharedRecord) -> CoreResult<()> {
        self.write(record, true)
    }

    /// Marks the record under `key` deleted.
    pub fn delete(&self, key: &str) -> CoreResult<()> {
        self.update(key, |record, options| {
            options.apply(record);
            record.base_mut().meta_or_create().delete();
            Ok(())
        })
    }

    /// Sets one field of the record under `key`.
    pub fn insert_value(&self, key: &str, field: &str, value: Value) -> CoreResult<()> {
        self.insert_values(key, [(field.to_owned(), value)])
    }

    /// Sets several fields of the record under `key` in one write.
    pub fn insert_values<I>(&self, key: &str, values: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.update(key, |record, options| {
            {
                let mut accessor = record
                    .accessor()
                    .ok_or_else(|| CoreError::accessor(format!("{key} has no field accessor")))?;
                for (field, value) in values {
                    accessor.set(&field, value).map_err(|e| {
                        CoreError::accessor(format!(
                            "failed to set {field} with {}: {e}",
                            accessor.type_name()
                        ))
                    })?;
                }
            }
            options.apply(record);
            Ok(())
        })
    }

    /// Sets an absolute expiry, Unix seconds.
    pub fn set_absolute_expiry(&self, key: &str, at: i64) -> CoreResult<()> {
        self.update(key, |record, options| {
            options.apply(record);
            record.base_mut().meta_or_create().set_absolute_expiry(at);
            Ok(())
        })
    }

    /// Sets an expiry `seconds` from now that moves with every later write.
    pub fn set_relative_expiry(&self, key: &str, seconds: i64) -> CoreResult<()> {
        self.update(key, |record, options| {
            options.apply(record);
            let meta = record.base_mut().meta_or_create();
            meta.set_relative_expiry(seconds);
            meta.update();
            Ok(())
        })
    }

    /// Hides the record under `key` from non-internal callers.
    pub fn make_secret(&self, key: &str) -> CoreResult<()> {
        self.update(key, |record, options| {
            options.apply(record);
            record.base_mut().meta_or_create().make_secret();
            Ok(())
        })
    }

    /// Hides the record under `key` from non-local callers.
    pub fn make_crown_jewel(&self, key: &str) -> CoreResult<()> {
        self.update(key, |record, options| {
            options.apply(record);
            record.base_mut().meta_or_create().make_crown_jewel();
            Ok(())
        })
    }

    /// Starts a scan. Requires a tokio runtime.
    pub fn query(&self, query: Query) -> CoreResult<RecordIterator> {
        query.check()?;
        self.system.controller(query.database_name())?.query(
            query,
            self.options.local,
            self.options.internal,
        )
    }

    /// Subscribes to writes matching `query`.
    pub fn subscribe(&self, query: Query) -> CoreResult<Subscription> {
        query.check()?;
        self.system.controller(query.database_name())?.subscribe(
            query,
            self.options.local,
            self.options.internal,
        )
    }

    /// Scans `query` and continues with its live changes. Requires a tokio
    /// runtime.
    pub fn query_subscribe(&self, query: Query) -> CoreResult<QuerySubscription> {
        query.check()?;
        let (iter, subscription) = self
            .system
            .controller(query.database_name())?
            .query_subscribe(query, self.options.local, self.options.internal)?;
        Ok(QuerySubscription::new(iter, subscription))
    }

    fn write(&self, record: &SharedRecord, as_new: bool) -> CoreResult<()> {
        let (key, name, db_key) = {
            let r = record.lock();
            let base = r.base();
            (
                base.key(),
                base.database_name().to_owned(),
                base.database_key().to_owned(),
            )
        };
        let controller = self.writable_controller(&name)?;

        if !self.options.has_all_permissions() {
            match controller.get(&db_key) {
                Ok(existing) => self.check_permission(&existing)?,
                Err(CoreError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }

        let result = {
            let mut r = record.lock();
            if as_new {
                r.base_mut().meta_or_create().reset();
            }
            self.options.apply(&mut *r);
            controller.commit(&*r)
        };
        self.after_write(&key, record, result)
    }

    /// Read-modify-write of the stored record under `key`.
    fn update<F>(&self, key: &str, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut dyn Record, &Options) -> CoreResult<()>,
    {
        let (name, db_key) = parse_key(key);
        let controller = self.writable_controller(name)?;
        let record = controller.get(db_key)?;
        self.check_permission(&record)?;

        let result = {
            let mut r = record.lock();
            f(&mut *r, &self.options).and_then(|()| controller.commit(&*r))
        };
        self.after_write(key, &record, result)
    }

    fn after_write(&self, key: &str, record: &SharedRecord, result: CoreResult<u64>) -> CoreResult<()> {
        match result {
            Ok(generation) if is_valid(record) => self.cache(key, record, generation),
            Ok(_) => self.uncache(key),
            Err(err) => {
                debug!(key, error = %err, "write failed");
                self.uncache(key);
                return Err(err);
            }
        }
        Ok(())
    }

    fn writable_controller(&self, name: &str) -> CoreResult<Arc<Controller>> {
        let controller = self.system.controller(name)?;
        if controller.read_only() {
            return Err(CoreError::ReadOnly);
        }
        Ok(controller)
    }

    fn check_permission(&self, record: &SharedRecord) -> CoreResult<()> {
        let permitted = record
            .lock()
            .meta()
            .is_some_and(|m| m.check_permission(self.options.local, self.options.internal));
        if permitted {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied)
        }
    }

    /// The cached record under `key`, if nothing was written to its
    /// database since and it is still valid. Stale entries are dropped.
    fn cached(&self, controller: &Controller, key: &str) -> Option<SharedRecord> {
        let entry = self.cache.as_ref()?.lock().get(&key.to_owned())?;
        if entry.generation == controller.generation() && is_valid(&entry.record) {
            return Some(entry.record);
        }
        self.uncache(key);
        None
    }

    fn cache(&self, key: &str, record: &SharedRecord, generation: u64) {
        if let Some(cache) = &self.cache {
            let entry = Cached {
                record: Arc::clone(record),
                generation,
            };
            cache.lock().insert(key.to_owned(), entry);
        }
    }

    fn uncache(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().remove(&key.to_owned());
        }
    }
}

fn is_valid(record: &SharedRecord) -> bool {
    record.lock().meta().is_some_and(|m| m.check_validity())
}
