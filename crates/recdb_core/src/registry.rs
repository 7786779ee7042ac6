//! Durable database registry.
//!
//! Maps database names to their storage type and descriptive metadata. The
//! registry is loaded once when the system starts and written back by a
//! background thread: every change marks it dirty and wakes the writer,
//! which waits for the flush delay to batch further changes and then writes
//! a snapshot atomically. Shutdown stops the writer and performs a final
//! synchronous flush.

use crate::dir::write_atomic;
use crate::error::{CoreError, CoreResult};
use crate::record::unix_now;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Registration entry of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name, the part of a key before the colon.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Storage type the backend is built from.
    pub storage_type: String,
    /// API the database is primarily accessed through.
    #[serde(default)]
    pub primary_api: String,
    /// Whether writes are rejected.
    #[serde(default)]
    pub read_only: bool,
    /// First registration, Unix seconds.
    #[serde(default)]
    pub registered: i64,
    /// Last registration change, Unix seconds.
    #[serde(default)]
    pub last_updated: i64,
    /// Last time a controller was started, Unix seconds.
    #[serde(default)]
    pub last_loaded: i64,
}

impl DatabaseInfo {
    /// Creates an entry with empty description and API.
    #[must_use]
    pub fn new(name: impl Into<String>, storage_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            storage_type: storage_type.into(),
            primary_api: String::new(),
            read_only: false,
            registered: 0,
            last_updated: 0,
            last_loaded: 0,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the primary API.
    #[must_use]
    pub fn primary_api(mut self, api: impl Into<String>) -> Self {
        self.primary_api = api.into();
        self
    }

    /// Sets the read-only flag.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Checks the name and storage type.
    pub fn validate(&self) -> CoreResult<()> {
        if !is_valid_name(&self.name) {
            return Err(CoreError::InvalidDatabaseName {
                name: self.name.clone(),
            });
        }
        if self.storage_type.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "database {} has no storage type",
                self.name
            )));
        }
        Ok(())
    }
}

/// Whether `name` is at least three characters of `[A-Za-z0-9_-]`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    name.len() >= 3
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, DatabaseInfo>>,
    dirty: AtomicBool,
}

impl Shared {
    fn flush(&self) -> CoreResult<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let result = serde_json::to_vec_pretty(&*self.entries.read())
            .map_err(|e| CoreError::registry(e.to_string()))
            .and_then(|data| write_atomic(&self.path, &data));
        match &result {
            Ok(()) => debug!(path = %self.path.display(), "registry flushed"),
            Err(err) => {
                self.dirty.store(true, Ordering::Release);
                error!(path = %self.path.display(), error = %err, "registry flush failed");
            }
        }
        result
    }
}

enum WriterMsg {
    Changed,
    Stop,
}

#[derive(Debug)]
struct Writer {
    tx: SyncSender<WriterMsg>,
    handle: JoinHandle<()>,
}

/// The set of registered databases, persisted as JSON.
#[derive(Debug)]
pub struct Registry {
    shared: Arc<Shared>,
    writer: Mutex<Option<Writer>>,
}

impl Registry {
    /// Loads the registry file at `path`, if present, and starts the
    /// background writer.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: &Path, flush_delay: Duration) -> CoreResult<Self> {
        let entries: BTreeMap<String, DatabaseInfo> = match fs::read(path) {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                CoreError::registry(format!("could not parse {}: {e}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), databases = entries.len(), "registry loaded");

        let shared = Arc::new(Shared {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::sync_channel(1);
        let writer_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("recdb-registry".into())
            .spawn(move || loop {
                match rx.recv() {
                    Ok(WriterMsg::Changed) => {}
                    Ok(WriterMsg::Stop) | Err(_) => return,
                }
                let deadline = Instant::now() + flush_delay;
                loop {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(WriterMsg::Changed) => {}
                        Ok(WriterMsg::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                        Err(RecvTimeoutError::Timeout) => break,
                    }
                }
                // Failures are logged and retried on the next change.
                let _ = writer_shared.flush();
            })?;

        Ok(Self {
            shared,
            writer: Mutex::new(Some(Writer { tx, handle })),
        })
    }

    /// Returns the entry for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DatabaseInfo> {
        self.shared.entries.read().get(name).cloned()
    }

    /// Registered database names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.shared.entries.read().keys().cloned().collect()
    }

    /// Adds or updates an entry and returns the stored version.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name, or when an existing database would change
    /// its storage type.
    pub fn register(&self, mut info: DatabaseInfo) -> CoreResult<DatabaseInfo> {
        info.validate()?;
        let now = unix_now();
        let stored = {
            let mut entries = self.shared.entries.write();
            match entries.get_mut(&info.name) {
                Some(existing) => {
                    if existing.storage_type != info.storage_type {
                        return Err(CoreError::invalid_operation(format!(
                            "database {} already uses storage type {}",
                            info.name, existing.storage_type
                        )));
                    }
                    existing.description = info.description;
                    existing.primary_api = info.primary_api;
                    existing.read_only = info.read_only;
                    existing.last_updated = now;
                    existing.clone()
                }
                None => {
                    info.registered = now;
                    info.last_updated = now;
                    entries.insert(info.name.clone(), info.clone());
                    info
                }
            }
        };
        self.changed();
        Ok(stored)
    }

    /// Records that a controller for `name` was started.
    pub fn mark_loaded(&self, name: &str) {
        let found = match self.shared.entries.write().get_mut(name) {
            Some(entry) => {
                entry.last_loaded = unix_now();
                true
            }
            None => false,
        };
        if found {
            self.changed();
        }
    }

    /// Writes pending changes now.
    pub fn flush(&self) -> CoreResult<()> {
        self.shared.flush()
    }

    /// Stops the background writer and flushes pending changes.
    pub fn shutdown(&self) -> CoreResult<()> {
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.tx.send(WriterMsg::Stop);
            if writer.handle.join().is_err() {
                error!("registry writer panicked");
            }
        }
        self.flush()
    }

    fn changed(&self) {
        self.shared.dirty.store(true, Ordering::Release);
        if let Some(writer) = self.writer.lock().as_ref() {
            match writer.tx.try_send(WriterMsg::Changed) {
                // A wakeup is already pending.
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    error!("registry writer is gone, changes are flushed at shutdown");
                }
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Errors are already logged by the flush.
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_file(path: &Path) -> BTreeMap<String, DatabaseInfo> {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn names_are_validated() {
        assert!(is_valid_name("core"));
        assert!(is_valid_name("my-db_2"));
        assert!(!is_valid_name("ab"));
        assert!(!is_valid_name("a b c"));
        assert!(!is_valid_name("db:x"));
        assert!(DatabaseInfo::new("core", "").validate().is_err());
    }

    #[test]
    fn register_stamps_and_updates() {
        let temp = tempdir().unwrap();
        let registry = Registry::open(&temp.path().join("r.json"), Duration::from_secs(60)).unwrap();

        let first = registry.register(DatabaseInfo::new("core", "memory")).unwrap();
        assert!(first.registered > 0);
        assert_eq!(first.registered, first.last_updated);

        let second = registry
            .register(DatabaseInfo::new("core", "memory").description("main").read_only(true))
            .unwrap();
        assert_eq!(second.registered, first.registered);
        assert_eq!(second.description, "main");
        assert!(second.read_only);

        let err = registry.register(DatabaseInfo::new("core", "log")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(matches!(
            registry.register(DatabaseInfo::new("x", "memory")),
            Err(CoreError::InvalidDatabaseName { .. })
        ));
        assert_eq!(registry.names(), vec!["core".to_owned()]);
    }

    #[test]
    fn background_writer_flushes_after_delay() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("r.json");
        let registry = Registry::open(&path, Duration::from_millis(20)).unwrap();
        registry.register(DatabaseInfo::new("core", "memory")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !path.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(read_file(&path).contains_key("core"));
    }

    #[test]
    fn shutdown_flushes_and_reload_sees_entries() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("r.json");
        {
            let registry = Registry::open(&path, Duration::from_secs(60)).unwrap();
            registry.register(DatabaseInfo::new("core", "log")).unwrap();
            registry.mark_loaded("core");
            registry.shutdown().unwrap();
            assert!(read_file(&path)["core"].last_loaded > 0);
        }
        let registry = Registry::open(&path, Duration::from_secs(60)).unwrap();
        assert_eq!(registry.get("core").unwrap().storage_type, "log");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("r.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            Registry::open(&path, Duration::from_secs(1)),
            Err(CoreError::Registry { .. })
        ));
    }
}
