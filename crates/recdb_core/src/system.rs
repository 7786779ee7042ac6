//! Process-scoped database system.

use crate::config::{Config, ScanConfig};
use crate::controller::Controller;
use crate::dir::DataDir;
use crate::error::{CoreError, CoreResult};
use crate::registry::{DatabaseInfo, Registry};
use crate::signal::{self, Signal, Trigger};
use crate::storage::{Storage, StorageContext, StorageFactory, StorageRegistry, INJECTED};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Owns the data directory, the database registry, the storage types and
/// every live controller.
///
/// Controllers are created lazily on first access. [`DatabaseSystem::shutdown`]
/// fires the shutdown signal observed by every open query and
/// subscription, flushes the registry and stops the controllers.
pub struct DatabaseSystem {
    config: Config,
    dir: DataDir,
    registry: Registry,
    storages: StorageRegistry,
    controllers: RwLock<BTreeMap<String, Arc<Controller>>>,
    trigger: Trigger,
    shutdown: Signal,
}

impl DatabaseSystem {
    /// Locks the root directory, loads the registry and starts its writer.
    ///
    /// # Errors
    ///
    /// [`CoreError::DirectoryLocked`] if another process uses the directory,
    /// or an error reading the registry.
    pub fn initialize(config: Config) -> CoreResult<Arc<Self>> {
        let dir = DataDir::open(&config.root_dir)?;
        let registry = Registry::open(&dir.registry_path(), config.registry_flush_delay)?;
        let (trigger, shutdown) = signal::signal();
        info!(root = %dir.path().display(), "database system initialized");
        Ok(Arc::new(Self {
            config,
            dir,
            registry,
            storages: StorageRegistry::with_builtin(),
            controllers: RwLock::new(BTreeMap::new()),
            trigger,
            shutdown,
        }))
    }

    /// The configuration the system was started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Query producer tuning.
    #[must_use]
    pub fn scan_config(&self) -> &ScanConfig {
        &self.config.scan
    }

    /// Registers a database or updates its description and flags.
    pub fn register(&self, info: DatabaseInfo) -> CoreResult<DatabaseInfo> {
        self.check_running()?;
        let stored = self.registry.register(info)?;
        info!(database = %stored.name, storage_type = %stored.storage_type, "database registered");
        Ok(stored)
    }

    /// The registry entry of `name`.
    #[must_use]
    pub fn database_info(&self, name: &str) -> Option<DatabaseInfo> {
        self.registry.get(name)
    }

    /// Registered database names, sorted.
    #[must_use]
    pub fn databases(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Makes a storage type available to databases.
    pub fn register_storage(&self, storage_type: &str, factory: StorageFactory) -> CoreResult<()> {
        self.storages.register(storage_type, factory)
    }

    /// Returns the controller of `name`, starting it if needed.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownDatabase`] for unregistered names,
    /// [`CoreError::UnknownStorage`] if the storage type is not available.
    pub fn controller(&self, name: &str) -> CoreResult<Arc<Controller>> {
        self.check_running()?;
        if let Some(controller) = self.controllers.read().get(name) {
            return Ok(Arc::clone(controller));
        }

        let info = self.registry.get(name).ok_or_else(|| CoreError::UnknownDatabase {
            name: name.to_owned(),
        })?;
        let mut controllers = self.controllers.write();
        if let Some(controller) = controllers.get(name) {
            return Ok(Arc::clone(controller));
        }
        if info.storage_type == INJECTED {
            return Err(CoreError::invalid_operation(format!(
                "database {name} has no injected storage yet"
            )));
        }

        let factory = self.storages.get(&info.storage_type)?;
        let storage = factory(&self.storage_context(&info))?;
        let controller = self.start_controller(&info, storage);
        controllers.insert(name.to_owned(), Arc::clone(&controller));
        Ok(controller)
    }

    /// Attaches a runtime-supplied backend to a database registered with
    /// storage type [`INJECTED`].
    pub fn inject(&self, name: &str, storage: Arc<dyn Storage>) -> CoreResult<Arc<Controller>> {
        self.check_running()?;
        let info = self.registry.get(name).ok_or_else(|| CoreError::UnknownDatabase {
            name: name.to_owned(),
        })?;
        if info.storage_type != INJECTED {
            return Err(CoreError::invalid_operation(format!(
                "database {name} uses storage type {}, not {INJECTED}",
                info.storage_type
            )));
        }
        if !storage.injected() {
            return Err(CoreError::invalid_operation(
                "only injected storages can be injected",
            ));
        }

        let mut controllers = self.controllers.write();
        if controllers.contains_key(name) {
            return Err(CoreError::invalid_operation(format!(
                "database {name} already has a storage"
            )));
        }
        let controller = self.start_controller(&info, storage);
        controllers.insert(name.to_owned(), Arc::clone(&controller));
        Ok(controller)
    }

    /// Signal fired when shutdown begins.
    #[must_use]
    pub fn shutdown_signal(&self) -> Signal {
        self.shutdown.clone()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.trigger.is_fired()
    }

    /// Cheap upkeep of every live database.
    pub fn maintain(&self) -> CoreResult<()> {
        for controller in self.live_controllers() {
            controller.maintain()?;
        }
        Ok(())
    }

    /// Compacts every live database.
    pub fn maintain_thorough(&self) -> CoreResult<()> {
        for controller in self.live_controllers() {
            controller.maintain_thorough()?;
        }
        Ok(())
    }

    /// Turns expired records into tombstones and purges tombstones deleted
    /// before `purge_deleted_before` (Unix seconds) in every live database.
    pub fn maintain_record_states(&self, purge_deleted_before: i64) -> CoreResult<()> {
        for controller in self.live_controllers() {
            controller.maintain_record_states(purge_deleted_before)?;
        }
        Ok(())
    }

    /// Stops the system.
    ///
    /// Fires the shutdown signal, flushes the registry, then shuts the
    /// controllers down in name order. The first failure stops the
    /// sequence; controllers after it stay open and a later call retries
    /// them.
    pub fn shutdown(&self) -> CoreResult<()> {
        self.trigger.fire();
        self.registry.shutdown()?;

        let mut controllers = self.controllers.write();
        while let Some((name, controller)) = controllers.pop_first() {
            if let Err(err) = controller.shutdown() {
                error!(database = %name, error = %err, "controller shutdown failed");
                controllers.insert(name, controller);
                return Err(err);
            }
        }
        info!(root = %self.dir.path().display(), "database system shut down");
        Ok(())
    }

    fn check_running(&self) -> CoreResult<()> {
        if self.is_shutting_down() {
            return Err(CoreError::ShuttingDown);
        }
        Ok(())
    }

    fn storage_context(&self, info: &DatabaseInfo) -> StorageContext {
        StorageContext {
            name: info.name.clone(),
            location: self.dir.database_location(&info.name, &info.storage_type),
            scan: self.config.scan,
            shutdown: self.shutdown.clone(),
        }
    }

    fn start_controller(&self, info: &DatabaseInfo, storage: Arc<dyn Storage>) -> Arc<Controller> {
        let controller = Arc::new(Controller::new(
            info,
            storage,
            self.shutdown.clone(),
            self.config.subscription_capacity,
        ));
        self.registry.mark_loaded(&info.name);
        controller
    }

    fn live_controllers(&self) -> Vec<Arc<Controller>> {
        self.controllers.read().values().cloned().collect()
    }
}

impl fmt::Debug for DatabaseSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSystem")
            .field("root", &self.dir.path())
            .field("storages", &self.storages)
            .field("controllers", &self.controllers.read().keys().collect::<Vec<_>>())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
