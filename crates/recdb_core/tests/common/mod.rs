//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use recdb_core::{Config, DatabaseInfo, DatabaseSystem, Interface, Options};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Routes library logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A system rooted in a temporary directory.
pub struct TestSystem {
    pub dir: TempDir,
    pub system: Arc<DatabaseSystem>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(f: impl FnOnce(Config) -> Config) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let system = DatabaseSystem::initialize(f(config(&dir))).unwrap();
        Self { dir, system }
    }

    /// Registers `name` with the given storage type.
    pub fn database(&self, name: &str, storage_type: &str) -> &Self {
        self.system
            .register(DatabaseInfo::new(name, storage_type))
            .unwrap();
        self
    }

    pub fn interface(&self, options: Options) -> Interface {
        Interface::new(Arc::clone(&self.system), options)
    }
}

pub fn config(dir: &TempDir) -> Config {
    Config::new(dir.path()).registry_flush_delay(Duration::from_millis(20))
}
