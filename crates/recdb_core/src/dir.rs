//! Data directory management.
//!
//! ```text
//! <root>/
//! ├─ LOCK                       # Advisory lock for single-process access
//! ├─ databases.json             # Database registry
//! └─ databases/<name>/<type>/   # One location per database and storage type
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const REGISTRY_FILE: &str = "databases.json";
const DATABASES_DIR: &str = "databases";

/// The root data directory, held under an exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates the data directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirectoryLocked`] if another process holds the
    /// lock, or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the registry file.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.path.join(REGISTRY_FILE)
    }

    /// Location reserved for a database with the given storage type.
    #[must_use]
    pub fn database_location(&self, name: &str, storage_type: &str) -> PathBuf {
        self.path.join(DATABASES_DIR).join(name).join(storage_type)
    }
}

/// Replaces `path` with `data` so readers see either the old or the new
/// content.
///
/// Writes `<path>.tmp`, syncs it, renames it over `path` and syncs the
/// parent directory.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directories cannot be fsynced.
    Ok(())
}
