//! Append-only ordered key log.

use crate::device::Device;
use crate::error::{StorageError, StorageResult};
use crate::frame::{Frame, FrameKind};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Location of a live value on the device.
#[derive(Debug, Clone, Copy)]
struct Slot {
    value_offset: u64,
    value_len: usize,
    frame_len: u64,
}

struct Inner<D> {
    device: D,
    index: BTreeMap<Vec<u8>, Slot>,
    live_bytes: u64,
    closed: bool,
}

/// Size accounting for a [`LogStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogStats {
    /// Number of live keys.
    pub entries: usize,
    /// Bytes held by the latest frame of every live key.
    pub live_bytes: u64,
    /// Total device size.
    pub total_bytes: u64,
}

impl LogStats {
    /// Bytes that compaction would reclaim.
    #[must_use]
    pub fn dead_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.live_bytes)
    }

    /// Share of the device taken by dead frames, in `0.0..=1.0`.
    #[must_use]
    pub fn dead_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.dead_bytes() as f64 / self.total_bytes as f64
        }
    }
}

/// Result of a compaction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionStats {
    /// Keys carried into the new log.
    pub kept: usize,
    /// Keys the filter dropped.
    pub dropped: usize,
    /// Device bytes before minus after.
    pub reclaimed_bytes: u64,
}

/// An ordered key/value store kept as an append-only log of frames.
///
/// Every write appends exactly one checksummed frame, so a single key is
/// either fully updated or untouched after a crash. The key index lives in
/// memory and is rebuilt by replaying the log on [`LogStore::open`]; a torn
/// or corrupt tail is truncated away.
///
/// Keys are kept in byte order, which is what [`LogStore::scan`] relies on
/// for prefix iteration.
pub struct LogStore<D: Device> {
    inner: RwLock<Inner<D>>,
}

impl<D: Device> LogStore<D> {
    /// Opens a log on `device`, replaying all frames.
    pub fn open(mut device: D) -> StorageResult<Self> {
        let size = device.size()?;
        let data = device.read_at(0, size as usize)?;

        let mut index = BTreeMap::new();
        let mut live_bytes = 0u64;
        let mut offset = 0usize;

        while offset < data.len() {
            let frame = match Frame::decode(&data[offset..], offset as u64) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!(
                        offset,
                        size,
                        error = %err,
                        "truncating torn log tail"
                    );
                    device.truncate(offset as u64)?;
                    break;
                }
            };
            let frame_len = frame.encoded_size() as u64;
            match frame.kind {
                FrameKind::Put => {
                    let slot = Slot {
                        value_offset: (offset + frame.value_offset()) as u64,
                        value_len: frame.value.len(),
                        frame_len,
                    };
                    live_bytes += frame_len;
                    if let Some(old) = index.insert(frame.key, slot) {
                        live_bytes -= old.frame_len;
                    }
                }
                FrameKind::Remove => {
                    if let Some(old) = index.remove(&frame.key) {
                        live_bytes -= old.frame_len;
                    }
                }
            }
            offset += frame_len as usize;
        }

        tracing::debug!(entries = index.len(), size, "log replayed");

        Ok(Self {
            inner: RwLock::new(Inner {
                device,
                index,
                live_bytes,
                closed: false,
            }),
        })
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        match inner.index.get(key) {
            Some(slot) => Ok(Some(inner.device.read_at(slot.value_offset, slot.value_len)?)),
            None => Ok(None),
        }
    }

    /// Returns whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.read().index.contains_key(key)
    }

    /// Stores `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let frame = Frame::put(key, value);
        let encoded = frame.encode()?;

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        let offset = inner.device.append(&encoded)?;
        inner.device.flush()?;

        let frame_len = encoded.len() as u64;
        let slot = Slot {
            value_offset: offset + frame.value_offset() as u64,
            value_len: value.len(),
            frame_len,
        };
        inner.live_bytes += frame_len;
        if let Some(old) = inner.index.insert(frame.key, slot) {
            inner.live_bytes -= old.frame_len;
        }
        Ok(())
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&self, key: &[u8]) -> StorageResult<bool> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        if !inner.index.contains_key(key) {
            return Ok(false);
        }
        let encoded = Frame::remove(key).encode()?;
        inner.device.append(&encoded)?;
        inner.device.flush()?;
        if let Some(old) = inner.index.remove(key) {
            inner.live_bytes -= old.frame_len;
        }
        Ok(true)
    }

    /// Returns up to `limit` entries whose key starts with `prefix`, in key
    /// order.
    ///
    /// With `after` set, iteration resumes strictly after that key. Callers
    /// page through large ranges by passing the last key of the previous
    /// batch; writes between batches are visible to later batches.
    pub fn scan(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }

        let start = match after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_vec()),
            _ => Bound::Included(prefix.to_vec()),
        };

        let mut out = Vec::new();
        for (key, slot) in inner.index.range((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) || out.len() >= limit {
                break;
            }
            let value = inner.device.read_at(slot.value_offset, slot.value_len)?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Returns whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size accounting.
    pub fn stats(&self) -> StorageResult<LogStats> {
        let inner = self.inner.read();
        Ok(LogStats {
            entries: inner.index.len(),
            live_bytes: inner.live_bytes,
            total_bytes: inner.device.size()?,
        })
    }

    /// Rewrites the log with only the latest frame of each key `keep`
    /// accepts.
    ///
    /// The rewrite goes through [`Device::replace`], so a crash leaves either
    /// the old or the new log in place.
    pub fn compact<F>(&self, mut keep: F) -> StorageResult<CompactionStats>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        let before = inner.device.size()?;

        let mut buf = Vec::with_capacity(inner.live_bytes as usize);
        let mut index = BTreeMap::new();
        let mut stats = CompactionStats::default();

        for (key, slot) in &inner.index {
            let value = inner.device.read_at(slot.value_offset, slot.value_len)?;
            if !keep(key, &value) {
                stats.dropped += 1;
                continue;
            }
            let frame = Frame::put(key, &value);
            let offset = buf.len();
            buf.extend(frame.encode()?);
            index.insert(
                key.clone(),
                Slot {
                    value_offset: (offset + frame.value_offset()) as u64,
                    value_len: value.len(),
                    frame_len: frame.encoded_size() as u64,
                },
            );
            stats.kept += 1;
        }

        inner.device.replace(&buf)?;
        inner.index = index;
        inner.live_bytes = buf.len() as u64;
        stats.reclaimed_bytes = before.saturating_sub(buf.len() as u64);

        tracing::debug!(
            kept = stats.kept,
            dropped = stats.dropped,
            reclaimed = stats.reclaimed_bytes,
            "log compacted"
        );
        Ok(stats)
    }

    /// Makes all writes durable.
    pub fn sync(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.device.sync()
    }

    /// Syncs and closes the log. Later calls fail with
    /// [`StorageError::Closed`].
    pub fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        inner.device.sync()?;
        inner.closed = true;
        Ok(())
    }
}

impl<D: Device> std::fmt::Debug for LogStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("LogStore")
            .field("entries", &inner.index.len())
            .field("live_bytes", &inner.live_bytes)
            .field("closed", &inner.closed)
            .finish()
    }
}
