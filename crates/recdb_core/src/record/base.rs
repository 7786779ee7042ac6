//! Identity and metadata shared by every record variant.

use super::meta::Meta;
use super::parse_key;

/// Database name, database key and metadata of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base {
    db_name: String,
    db_key: String,
    meta: Option<Meta>,
}

impl Base {
    /// Creates a base from a composite `name:key` string.
    #[must_use]
    pub fn new(key: &str) -> Self {
        let mut base = Self::default();
        base.set_key(key);
        base
    }

    /// Creates a base from its parts.
    #[must_use]
    pub fn with_parts(db_name: &str, db_key: &str) -> Self {
        Self {
            db_name: db_name.to_owned(),
            db_key: db_key.to_owned(),
            meta: None,
        }
    }

    /// Composite key, `name:key`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.db_name, self.db_key)
    }

    /// Whether a database name has been set.
    #[must_use]
    pub fn key_is_set(&self) -> bool {
        !self.db_name.is_empty()
    }

    /// Replaces name and key from a composite string.
    pub fn set_key(&mut self, key: &str) {
        let (name, key) = parse_key(key);
        self.db_name = name.to_owned();
        self.db_key = key.to_owned();
    }

    /// Database name.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.db_name
    }

    /// Key within the database.
    #[must_use]
    pub fn database_key(&self) -> &str {
        &self.db_key
    }

    /// Metadata, if any has been attached.
    #[must_use]
    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    /// Mutable metadata, if any has been attached.
    pub fn meta_mut(&mut self) -> Option<&mut Meta> {
        self.meta.as_mut()
    }

    /// Attaches metadata.
    pub fn set_meta(&mut self, meta: Meta) {
        self.meta = Some(meta);
    }

    /// Attaches empty metadata, replacing any present, and returns it.
    pub fn create_meta(&mut self) -> &mut Meta {
        self.meta.insert(Meta::default())
    }

    /// Returns the metadata, attaching empty metadata first if needed.
    pub fn meta_or_create(&mut self) -> &mut Meta {
        self.meta.get_or_insert_with(Meta::default)
    }

    /// Stamps a write on the metadata, creating it if needed.
    pub fn update_meta(&mut self) {
        self.meta_or_create().update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key() {
        let base = Base::new("core:settings/theme");
        assert_eq!(base.database_name(), "core");
        assert_eq!(base.database_key(), "settings/theme");
        assert_eq!(base.key(), "core:settings/theme");
        assert!(base.key_is_set());
        assert!(!Base::default().key_is_set());
    }

    #[test]
    fn update_meta_creates_meta() {
        let mut base = Base::with_parts("core", "a");
        assert!(base.meta().is_none());
        base.update_meta();
        let meta = base.meta().unwrap();
        assert!(meta.created > 0);
        assert_eq!(meta.created, meta.modified);
    }

    #[test]
    fn create_meta_replaces() {
        let mut base = Base::new("core:a");
        base.update_meta();
        base.create_meta();
        assert_eq!(base.meta(), Some(&Meta::default()));
    }
}
