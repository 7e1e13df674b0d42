use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::types::Result;

/// Durable key/value store used to persist visibility hash assignments.
///
/// `put_if_absent` must be atomic so that concurrent first writers of a key
/// all observe the same winning value.
pub trait MetadataStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Stores `value` under `key` unless a value is already present, and
    /// returns the value the store holds afterwards.
    fn put_if_absent(&self, key: &str, value: &str) -> Result<String>;

    /// Returns every `(key, value)` pair whose key starts with `prefix`,
    /// ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// In-memory [`MetadataStore`].
#[derive(Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryMetadataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<String> {
        Ok(self
            .entries
            .write()
            .entry(key.to_string())
            .or_insert_with(|| value.to_string())
            .clone())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let guard = self.entries.read();
        Ok(guard
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_bounded() {
        let store = MemoryMetadataStore::new();
        store.put("a/1", "x").unwrap();
        store.put("a/2", "y").unwrap();
        store.put("ab", "z").unwrap();
        store.put("b/1", "w").unwrap();
        let hits = store.scan_prefix("a/").unwrap();
        assert_eq!(
            hits,
            vec![
                ("a/1".to_string(), "x".to_string()),
                ("a/2".to_string(), "y".to_string())
            ]
        );
        store.put("a/1", "x2").unwrap();
        assert_eq!(store.get("a/1").unwrap().as_deref(), Some("x2"));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn put_if_absent_keeps_first_value() {
        let store = MemoryMetadataStore::new();
        assert_eq!(store.put_if_absent("k", "first").unwrap(), "first");
        assert_eq!(store.put_if_absent("k", "second").unwrap(), "first");
        assert_eq!(store.get("k").unwrap().as_deref(), Some("first"));
    }
}
