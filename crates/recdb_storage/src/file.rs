//! File device for persistent storage.

use crate::device::Device;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A device backed by a single file.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
/// - `replace()` writes a sibling temp file, syncs it, renames it over the
///   original and syncs the parent directory
///
/// # Example
///
/// ```no_run
/// use recdb_storage::{Device, FileDevice};
/// use std::path::Path;
///
/// let mut device = FileDevice::open(Path::new("records.log")).unwrap();
/// device.append(b"frame").unwrap();
/// device.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileDevice {
    /// Opens or creates the file at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates the file, creating parent directories if needed.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl Device for FileDevice {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size}, file holds {} bytes", *size),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp_path = self.temp_path();
        let mut temp = File::create(&temp_path)?;
        temp.write_all(data)?;
        temp.sync_all()?;
        drop(temp);

        let mut file = self.file.write();
        let mut size = self.size.write();
        fs::rename(&temp_path, &self.path)?;
        self.sync_parent()?;

        *file = Self::open_file(&self.path)?;
        *size = data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_append_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");

        let mut device = FileDevice::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(device.append(b"hello").unwrap(), 0);
        assert_eq!(device.append(b" world").unwrap(), 5);
        assert_eq!(device.read_at(0, 11).unwrap(), b"hello world");
        assert!(matches!(
            device.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn content_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");

        {
            let mut device = FileDevice::open(&path).unwrap();
            device.append(b"persistent").unwrap();
            device.sync().unwrap();
        }

        let device = FileDevice::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 10);
        assert_eq!(device.read_at(0, 10).unwrap(), b"persistent");
    }

    #[test]
    fn replace_swaps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");

        let mut device = FileDevice::open(&path).unwrap();
        device.append(b"old content here").unwrap();
        device.replace(b"new").unwrap();
        assert_eq!(device.size().unwrap(), 3);
        assert_eq!(device.read_at(0, 3).unwrap(), b"new");

        device.append(b"!").unwrap();
        drop(device);
        assert_eq!(fs::read(&path).unwrap(), b"new!");
        assert!(!dir.path().join("records.log.tmp").exists());
    }

    #[test]
    fn nested_dirs_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("records.log");
        let device = FileDevice::open_with_create_dirs(&path).unwrap();
        assert_eq!(device.path(), path);
    }
}
