//! Storage type registry.

use super::{KvStorage, Storage};
use crate::config::ScanConfig;
use crate::error::{CoreError, CoreResult};
use crate::signal::Signal;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Storage type of databases whose backend is supplied at runtime.
pub const INJECTED: &str = "injected";

/// Builds a backend for one database.
pub type StorageFactory = Arc<dyn Fn(&StorageContext) -> CoreResult<Arc<dyn Storage>> + Send + Sync>;

/// Everything a factory needs to open a backend.
#[derive(Debug, Clone)]
pub struct StorageContext {
    /// Database name.
    pub name: String,
    /// Directory reserved for this database and storage type.
    pub location: PathBuf,
    /// Query producer tuning.
    pub scan: ScanConfig,
    /// Process shutdown signal.
    pub shutdown: Signal,
}

/// Maps storage type names to factories.
pub struct StorageRegistry {
    factories: RwLock<HashMap<String, StorageFactory>>,
}

impl StorageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry with the `memory` and `log` types.
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        let memory: StorageFactory = Arc::new(|ctx: &StorageContext| {
            Ok(Arc::new(KvStorage::memory(ctx)?) as Arc<dyn Storage>)
        });
        let log: StorageFactory = Arc::new(|ctx: &StorageContext| {
            Ok(Arc::new(KvStorage::open_log(ctx)?) as Arc<dyn Storage>)
        });
        registry.factories.write().insert("memory".into(), memory);
        registry.factories.write().insert("log".into(), log);
        registry
    }

    /// Registers a factory under `storage_type`.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or reserved.
    pub fn register(&self, storage_type: &str, factory: StorageFactory) -> CoreResult<()> {
        if storage_type.is_empty() || storage_type == INJECTED {
            return Err(CoreError::invalid_operation(format!(
                "storage type name {storage_type:?} is reserved"
            )));
        }
        let mut factories = self.factories.write();
        if factories.contains_key(storage_type) {
            return Err(CoreError::invalid_operation(format!(
                "storage type {storage_type:?} already registered"
            )));
        }
        factories.insert(storage_type.to_owned(), factory);
        Ok(())
    }

    /// Returns the factory for `storage_type`.
    pub fn get(&self, storage_type: &str) -> CoreResult<StorageFactory> {
        self.factories
            .read()
            .get(storage_type)
            .cloned()
            .ok_or_else(|| CoreError::UnknownStorage {
                storage_type: storage_type.to_owned(),
            })
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types() {
        let registry = StorageRegistry::with_builtin();
        assert_eq!(registry.types(), vec!["log".to_owned(), "memory".to_owned()]);
        assert!(registry.get("memory").is_ok());
        assert!(matches!(
            registry.get("nope").err(),
            Some(CoreError::UnknownStorage { .. })
        ));
    }

    #[test]
    fn duplicates_and_reserved_names_rejected() {
        let registry = StorageRegistry::with_builtin();
        let factory = registry.get("memory").unwrap();
        assert!(registry.register("memory", Arc::clone(&factory)).is_err());
        assert!(registry.register(INJECTED, Arc::clone(&factory)).is_err());
        assert!(registry.register("", Arc::clone(&factory)).is_err());
        assert!(registry.register("other", factory).is_ok());
    }
}
