//! # recdb Storage
//!
//! Byte devices and the append-only ordered key log that recdb's persistent
//! backends are built on.
//!
//! ## Layers
//!
//! - [`Device`]: an opaque append-only byte store ([`MemoryDevice`],
//!   [`FileDevice`])
//! - [`LogStore`]: an ordered key/value map kept as a log of checksummed
//!   frames on a device, with prefix scans and compaction
//!
//! Devices know nothing about frames; the log knows nothing about records.
//!
//! ## Example
//!
//! ```rust
//! use recdb_storage::{LogStore, MemoryDevice};
//!
//! let log = LogStore::open(MemoryDevice::new()).unwrap();
//! log.put(b"users/1", b"alice").unwrap();
//! assert_eq!(log.get(b"users/1").unwrap(), Some(b"alice".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod file;
mod frame;
mod log;
mod memory;

pub use device::Device;
pub use error::{StorageError, StorageResult};
pub use file::FileDevice;
pub use frame::{Frame, FrameKind};
pub use log::{CompactionStats, LogStats, LogStore};
pub use memory::MemoryDevice;
