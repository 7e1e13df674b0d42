use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use super::eval::{evaluate, Authorizations};
use super::expr::VisibilityExpr;
use crate::options::CoreOptions;
use crate::storage::{default_metrics, CoreMetrics, MetadataStore};
use crate::types::{GraphError, Result};

/// Separator between metadata key components; rejected in logical names.
const KEY_SEP: char = '\u{1f}';
const FORWARD_PREFIX: &str = "vis.fwd";
const REVERSE_PREFIX: &str = "vis.rev";
/// Length of a rendered visibility hash.
pub const HASH_LEN: usize = 16;
/// Seeds tried before giving up on a colliding visibility text.
const MAX_HASH_PROBES: u64 = 16;

/// Maps `(logical name, visibility)` pairs to stable physical field names.
///
/// Assignments are persisted in a [`MetadataStore`] and never revoked, so a
/// hash written once stays resolvable for the lifetime of the store. A sharded
/// LRU cache sits in front of the store.
pub struct VisibilityFieldEncoder {
    store: Arc<dyn MetadataStore>,
    separator: String,
    forward: HashCache,
    reverse: HashCache,
    metrics: Arc<dyn CoreMetrics>,
}

impl VisibilityFieldEncoder {
    /// Creates an encoder with default options.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self::with_options(store, &CoreOptions::default(), default_metrics())
    }

    /// Creates an encoder using the cache and separator settings in `opts`.
    pub fn with_options(
        store: Arc<dyn MetadataStore>,
        opts: &CoreOptions,
        metrics: Arc<dyn CoreMetrics>,
    ) -> Self {
        Self {
            store,
            separator: opts.field_separator.clone(),
            forward: HashCache::new(opts.hash_cache_shards, opts.hash_cache_capacity),
            reverse: HashCache::new(opts.hash_cache_shards, opts.hash_cache_capacity),
            metrics,
        }
    }

    /// Separator placed between the logical name and the hash.
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Returns the hash assigned to `(logical_name, visibility)`, assigning
    /// and persisting one on first use.
    pub fn hash_for(&self, logical_name: &str, visibility: &VisibilityExpr) -> Result<String> {
        validate_name(logical_name)?;
        let text = visibility.canonical_text();
        let fwd_key = forward_key(logical_name, &text);
        if let Some(hash) = self.forward.get(&fwd_key) {
            self.metrics.hash_lookup(true);
            return Ok(hash);
        }
        self.metrics.hash_lookup(false);
        if let Some(hash) = self.store.get(&fwd_key)? {
            self.forward.put(fwd_key, hash.clone());
            self.reverse.put(hash.clone(), text);
            return Ok(hash);
        }
        // Reverse first: a visible forward mapping must always resolve.
        let claimed = self.claim_hash(&text)?;
        let hash = self.store.put_if_absent(&fwd_key, &claimed)?;
        debug!(
            logical_name,
            visibility = %text,
            hash = %hash,
            "visibility.hash.assigned"
        );
        self.metrics.hash_assigned();
        self.forward.put(fwd_key, hash.clone());
        self.reverse.put(hash.clone(), text);
        Ok(hash)
    }

    /// Physical field name: `logical_name + separator + hash`.
    pub fn physical_name(&self, logical_name: &str, visibility: &VisibilityExpr) -> Result<String> {
        let hash = self.hash_for(logical_name, visibility)?;
        Ok(format!("{logical_name}{}{hash}", self.separator))
    }

    /// Splits a physical field name into `(logical_name, hash)`.
    pub fn split_physical_name<'a>(&self, physical: &'a str) -> Option<(&'a str, &'a str)> {
        let (name, hash) = physical.rsplit_once(self.separator.as_str())?;
        if name.is_empty() || !is_hash(hash) {
            return None;
        }
        Some((name, hash))
    }

    /// Resolves a hash back to its visibility.
    ///
    /// Fails with [`GraphError::UnknownVisibilityHash`] when the hash was never
    /// assigned by this store.
    pub fn visibility_from_hash(&self, hash: &str) -> Result<VisibilityExpr> {
        let text = match self.reverse.get(hash) {
            Some(text) => {
                self.metrics.hash_lookup(true);
                text
            }
            None => {
                self.metrics.hash_lookup(false);
                let text = self
                    .store
                    .get(&reverse_key(hash))?
                    .ok_or_else(|| GraphError::UnknownVisibilityHash(hash.to_string()))?;
                self.reverse.put(hash.to_string(), text.clone());
                text
            }
        };
        VisibilityExpr::parse(&text)
    }

    /// Every visibility ever registered for `logical_name`, with its hash.
    pub fn known_visibilities(&self, logical_name: &str) -> Result<Vec<(String, VisibilityExpr)>> {
        validate_name(logical_name)?;
        let prefix = forward_name_prefix(logical_name);
        let mut out = Vec::new();
        for (key, hash) in self.store.scan_prefix(&prefix)? {
            let text = &key[prefix.len()..];
            out.push((hash, VisibilityExpr::parse(text)?));
        }
        Ok(out)
    }

    /// Hashes registered for `logical_name` whose visibility `auths` satisfies.
    pub fn readable_hashes(
        &self,
        logical_name: &str,
        auths: &Authorizations,
    ) -> Result<BTreeSet<String>> {
        let mut readable = BTreeSet::new();
        for (hash, visibility) in self.known_visibilities(logical_name)? {
            if evaluate(&visibility, auths)? {
                readable.insert(hash);
            }
        }
        Ok(readable)
    }

    /// Physical field names of `logical_name` that `auths` may query.
    pub fn readable_physical_names(
        &self,
        logical_name: &str,
        auths: &Authorizations,
    ) -> Result<Vec<String>> {
        Ok(self
            .readable_hashes(logical_name, auths)?
            .into_iter()
            .map(|hash| format!("{logical_name}{}{hash}", self.separator))
            .collect())
    }

    /// Claims the first probed hash whose reverse mapping is free or already
    /// names `text`.
    fn claim_hash(&self, text: &str) -> Result<String> {
        for seed in 0..MAX_HASH_PROBES {
            let hash = render_hash(xxh64(text.as_bytes(), seed));
            let existing = self.store.put_if_absent(&reverse_key(&hash), text)?;
            if existing == text {
                return Ok(hash);
            }
            warn!(
                visibility = %text,
                existing = %existing,
                hash = %hash,
                seed,
                "visibility.hash.collision"
            );
        }
        Err(GraphError::Storage(format!(
            "no free visibility hash for {text:?} after {MAX_HASH_PROBES} probes"
        )))
    }
}

fn render_hash(raw: u64) -> String {
    format!("{raw:016x}")
}

fn is_hash(candidate: &str) -> bool {
    candidate.len() == HASH_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

fn validate_name(logical_name: &str) -> Result<()> {
    if logical_name.is_empty() {
        return Err(GraphError::Invalid("logical field name is empty".into()));
    }
    if logical_name.contains(KEY_SEP) {
        return Err(GraphError::Invalid(format!(
            "logical field name {logical_name:?} contains a reserved character"
        )));
    }
    Ok(())
}

fn forward_name_prefix(logical_name: &str) -> String {
    format!("{FORWARD_PREFIX}{KEY_SEP}{logical_name}{KEY_SEP}")
}

fn forward_key(logical_name: &str, text: &str) -> String {
    format!("{}{text}", forward_name_prefix(logical_name))
}

fn reverse_key(hash: &str) -> String {
    format!("{REVERSE_PREFIX}{KEY_SEP}{hash}")
}

struct HashCache {
    shards: Vec<Mutex<LruCache<String, String>>>,
}

impl HashCache {
    fn new(shards: usize, capacity: usize) -> Self {
        let shard_count = shards.max(1);
        let per_shard = NonZeroUsize::new((capacity / shard_count).max(1)).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self { shards }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.shard_for(key).lock().get(key).cloned()
    }

    fn put(&self, key: String, value: String) {
        self.shard_for(&key).lock().put(key, value);
    }

    fn shard_for(&self, key: &str) -> &Mutex<LruCache<String, String>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMetadataStore;

    fn vis(text: &str) -> VisibilityExpr {
        VisibilityExpr::parse(text).unwrap()
    }

    #[test]
    fn equivalent_visibilities_share_a_hash() {
        let encoder = VisibilityFieldEncoder::new(Arc::new(MemoryMetadataStore::new()));
        let a = encoder.hash_for("name", &vis("a&b")).unwrap();
        let b = encoder.hash_for("name", &vis("b & a")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_LEN);
        let c = encoder.hash_for("name", &vis("a|b")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn physical_names_split_back() {
        let encoder = VisibilityFieldEncoder::new(Arc::new(MemoryMetadataStore::new()));
        let physical = encoder.physical_name("first_name", &vis("x")).unwrap();
        let (name, hash) = encoder.split_physical_name(&physical).unwrap();
        assert_eq!(name, "first_name");
        assert_eq!(hash, encoder.hash_for("first_name", &vis("x")).unwrap());
        assert!(encoder.split_physical_name("first_name").is_none());
        assert!(encoder.split_physical_name("first_name_zz").is_none());
    }

    #[test]
    fn colliding_hash_probes_next_seed() {
        let store = Arc::new(MemoryMetadataStore::new());
        let squatted = render_hash(xxh64(b"a", 0));
        store.put(&reverse_key(&squatted), "someone-else").unwrap();
        let encoder = VisibilityFieldEncoder::new(store);
        let hash = encoder.hash_for("f", &vis("a")).unwrap();
        assert_eq!(hash, render_hash(xxh64(b"a", 1)));
        assert_eq!(encoder.visibility_from_hash(&hash).unwrap(), vis("a"));
        assert_eq!(encoder.visibility_from_hash(&squatted).unwrap(), vis("someone-else"));
    }

    #[test]
    fn rejects_reserved_names() {
        let encoder = VisibilityFieldEncoder::new(Arc::new(MemoryMetadataStore::new()));
        assert!(encoder.hash_for("", &vis("a")).is_err());
        assert!(encoder.hash_for("bad\u{1f}name", &vis("a")).is_err());
    }
}
