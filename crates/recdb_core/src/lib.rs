//! # recdb Core
//!
//! Embeddable record storage with queries and live change feeds.
//!
//! This crate provides:
//! - Records with metadata (timestamps, expiry, deletion, access flags)
//!   and their binary envelope
//! - A storage backend contract with log-backed reference backends
//! - Per-database controllers and a durable database registry
//! - Queries with backpressured result iterators
//! - Subscriptions and query-then-subscribe feeds
//! - [`Interface`], the caching and permission-checking entry point
//!
//! ## Usage
//!
//! ```no_run
//! use recdb_core::{share, Config, DatabaseInfo, DatabaseSystem, Interface, Options, Query, TypedRecord};
//! use serde_json::json;
//!
//! # async fn run() -> recdb_core::CoreResult<()> {
//! let system = DatabaseSystem::initialize(Config::new("data"))?;
//! system.register(DatabaseInfo::new("core", "log"))?;
//! let db = Interface::new(system.clone(), Options::trusted());
//!
//! db.put_new(&share(TypedRecord::new("core:test/a", json!({"x": 1}))))?;
//!
//! let mut results = db.query(Query::parse("query core:test/ where x == 1")?)?;
//! while let Some(record) = results.next().await {
//!     println!("{}", record.lock().key());
//! }
//! system.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod accessor;
mod cache;
mod config;
mod controller;
mod dir;
mod error;
mod interface;
pub mod iterator;
mod options;
pub mod query;
mod query_subscription;
pub mod record;
mod registry;
mod signal;
pub mod storage;
mod subscription;
mod system;

pub use accessor::Accessor;
pub use cache::ArcCache;
pub use config::{Config, ScanConfig};
pub use controller::Controller;
pub use dir::DataDir;
pub use error::{CoreError, CoreResult};
pub use interface::Interface;
pub use iterator::{Delivery, IteratorFeed, RecordIterator, Scanned};
pub use options::Options;
pub use query::Query;
pub use query_subscription::{QsubEvent, QuerySubscription};
pub use record::{parse_key, share, unix_now, Base, Meta, Record, SharedRecord, TypedRecord, Wrapper};
pub use registry::{is_valid_name, DatabaseInfo, Registry};
pub use signal::{signal, Signal, Trigger};
pub use storage::{KvStorage, Storage, StorageContext, StorageFactory, StorageRegistry};
pub use subscription::{Change, ChangeKind, Subscription};
pub use system::DatabaseSystem;
