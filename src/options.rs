//! Crate-wide configuration, loadable from TOML.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::types::{GraphError, Result};

/// Tunables shared by the visibility encoder, the mutation log and the write
/// queue. Every field has a default, so a TOML file only needs to name the
/// values it overrides.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CoreOptions {
    /// Number of independently locked partitions of the write queue.
    pub write_queue_shards: usize,
    /// Number of independently locked partitions of the in-memory mutation log.
    pub log_shards: usize,
    /// Total entries kept in the visibility hash cache.
    pub hash_cache_capacity: usize,
    /// Number of shards the visibility hash cache is split across.
    pub hash_cache_shards: usize,
    /// Separator placed between a logical field name and its visibility hash.
    pub field_separator: String,
    /// How many times a write failing with document-missing may be resubmitted.
    pub document_missing_retries: u32,
    /// Default `tracing` filter used by [`crate::logging::init_logging`].
    pub log_filter: String,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            write_queue_shards: 16,
            log_shards: 16,
            hash_cache_capacity: 4096,
            hash_cache_shards: 8,
            field_separator: "_".to_string(),
            document_missing_retries: 1,
            log_filter: "info".to_string(),
        }
    }
}

impl CoreOptions {
    /// Parses options from TOML text and validates them.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let opts: CoreOptions =
            toml::from_str(text).map_err(|err| GraphError::Config(err.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Loads options from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the components cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.write_queue_shards == 0 || self.log_shards == 0 || self.hash_cache_shards == 0 {
            return Err(GraphError::Config("shard counts must be positive".into()));
        }
        if self.hash_cache_capacity == 0 {
            return Err(GraphError::Config("hash cache capacity must be positive".into()));
        }
        if self.field_separator.is_empty() {
            return Err(GraphError::Config("field separator must not be empty".into()));
        }
        if self.field_separator.bytes().any(|b| b.is_ascii_hexdigit()) {
            return Err(GraphError::Config(
                "field separator must not contain hexadecimal digits".into(),
            ));
        }
        Ok(())
    }

    /// Sets the number of write-queue shards.
    pub fn write_queue_shards(mut self, shards: usize) -> Self {
        self.write_queue_shards = shards;
        self
    }

    /// Sets the number of mutation-log shards.
    pub fn log_shards(mut self, shards: usize) -> Self {
        self.log_shards = shards;
        self
    }

    /// Sets the visibility hash cache capacity.
    pub fn hash_cache_capacity(mut self, capacity: usize) -> Self {
        self.hash_cache_capacity = capacity;
        self
    }

    /// Sets the number of visibility hash cache shards.
    pub fn hash_cache_shards(mut self, shards: usize) -> Self {
        self.hash_cache_shards = shards;
        self
    }

    /// Sets the `tracing` filter directive used by
    /// [`init_from_options`](crate::logging::init_from_options).
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Sets the physical field-name separator.
    pub fn field_separator(mut self, separator: impl Into<String>) -> Self {
        self.field_separator = separator.into();
        self
    }

    /// Sets the document-missing resubmission budget.
    pub fn document_missing_retries(mut self, retries: u32) -> Self {
        self.document_missing_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let opts = CoreOptions::from_toml_str("write_queue_shards = 4\nfield_separator = \"__\"").unwrap();
        assert_eq!(opts.write_queue_shards, 4);
        assert_eq!(opts.field_separator, "__");
        assert_eq!(opts.log_shards, CoreOptions::default().log_shards);
    }

    #[test]
    fn builder_sets_every_field() {
        let opts = CoreOptions::default()
            .write_queue_shards(2)
            .log_shards(3)
            .hash_cache_shards(5)
            .hash_cache_capacity(64)
            .field_separator("__")
            .document_missing_retries(7)
            .log_filter("cellgraph=debug");
        assert_eq!(opts.write_queue_shards, 2);
        assert_eq!(opts.log_shards, 3);
        assert_eq!(opts.hash_cache_shards, 5);
        assert_eq!(opts.hash_cache_capacity, 64);
        assert_eq!(opts.field_separator, "__");
        assert_eq!(opts.document_missing_retries, 7);
        assert_eq!(opts.log_filter, "cellgraph=debug");
        opts.validate().unwrap();
        assert!(CoreOptions::default().hash_cache_shards(0).validate().is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            CoreOptions::from_toml_str("log_shards = 0"),
            Err(GraphError::Config(_))
        ));
        assert!(CoreOptions::from_toml_str("field_separator = \"a\"").is_err());
        assert!(CoreOptions::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn load_reads_file_or_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(CoreOptions::load(&missing).unwrap(), CoreOptions::default());
        let path = dir.path().join("cellgraph.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "hash_cache_capacity = 32").unwrap();
        assert_eq!(CoreOptions::load(&path).unwrap().hash_cache_capacity, 32);
    }
}
