//! Per-interface access and write policy.

use crate::record::Record;
use std::time::Duration;

/// Policy an [`crate::Interface`] applies to its callers.
///
/// `local` callers may see crown jewels and `internal` callers may see
/// secrets. The `always_*` fields are forced onto every record written
/// through the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// The caller runs on the same host.
    pub local: bool,
    /// The caller is a trusted in-process component.
    pub internal: bool,
    /// Mark every written record secret.
    pub always_make_secret: bool,
    /// Mark every written record a crown jewel.
    pub always_make_crown_jewel: bool,
    /// Relative expiry in seconds set on every write, zero for none.
    pub always_set_relative_expiry: i64,
    /// Absolute expiry set on every write, zero for none. Wins over the
    /// relative expiry.
    pub always_set_absolute_expiry: i64,
    /// Cached records, zero disables the cache.
    pub cache_size: usize,
    /// How long a cached record stays valid.
    pub cache_expiration: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            local: false,
            internal: false,
            always_make_secret: false,
            always_make_crown_jewel: false,
            always_set_relative_expiry: 0,
            always_set_absolute_expiry: 0,
            cache_size: 0,
            cache_expiration: Duration::from_secs(3600),
        }
    }
}

impl Options {
    /// Options for a trusted local caller.
    #[must_use]
    pub fn trusted() -> Self {
        Self {
            local: true,
            internal: true,
            ..Self::default()
        }
    }

    /// Sets the local flag.
    #[must_use]
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets the internal flag.
    #[must_use]
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    /// Enables the cache with `size` entries.
    #[must_use]
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the cache expiration window.
    #[must_use]
    pub fn cache_expiration(mut self, expiration: Duration) -> Self {
        self.cache_expiration = expiration;
        self
    }

    /// Whether the caller may see every record.
    #[must_use]
    pub fn has_all_permissions(&self) -> bool {
        self.local && self.internal
    }

    /// Stamps `record` for a write and forces the configured flags and
    /// expiry onto it.
    pub fn apply(&self, record: &mut dyn Record) {
        let meta = record.base_mut().meta_or_create();
        if self.always_make_secret {
            meta.make_secret();
        }
        if self.always_make_crown_jewel {
            meta.make_crown_jewel();
        }
        if self.always_set_absolute_expiry > 0 {
            meta.set_absolute_expiry(self.always_set_absolute_expiry);
        } else if self.always_set_relative_expiry > 0 {
            meta.set_relative_expiry(self.always_set_relative_expiry);
        }
        meta.update();
    }
}
