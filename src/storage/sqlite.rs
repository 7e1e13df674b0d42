use std::ops::Bound;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::log::{MutationLog, TimeBounds};
use super::meta::MetadataStore;
use super::mutation::{LoggedMutation, Mutation};
use crate::types::{ElementKey, GraphError, Result, Timestamp};

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// [`MetadataStore`] persisted in a SQLite table.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(open_connection(path.as_ref())?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<String> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO NOTHING",
            params![key, value],
        )?;
        let stored = conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM metadata WHERE key >= ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, value) = row?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

/// [`MutationLog`] persisted in SQLite; mutation bodies are stored as JSON.
pub struct SqliteMutationLog {
    conn: Mutex<Connection>,
}

impl SqliteMutationLog {
    /// Opens (creating if needed) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(open_connection(path.as_ref())?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS mutations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                element TEXT NOT NULL,
                ts INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_mutations_element_ts ON mutations (element, ts, seq)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Largest timestamp stored, used to seed an [`super::IncreasingClock`]
    /// after a restart.
    pub fn max_timestamp(&self) -> Result<Option<Timestamp>> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row("SELECT MAX(ts) FROM mutations", [], |row| row.get(0))?;
        Ok(max.map(|ts| ts as Timestamp))
    }
}

fn sql_ts(ts: Timestamp) -> Result<i64> {
    i64::try_from(ts).map_err(|_| GraphError::Invalid(format!("timestamp {ts} exceeds storage range")))
}

fn sql_range(bounds: &TimeBounds) -> (i64, i64) {
    let clamp = |ts: Timestamp| i64::try_from(ts).unwrap_or(i64::MAX);
    let lo = match bounds.0 {
        Bound::Included(ts) => clamp(ts),
        Bound::Excluded(ts) => clamp(ts).saturating_add(1),
        Bound::Unbounded => i64::MIN,
    };
    let hi = match bounds.1 {
        Bound::Included(ts) => clamp(ts),
        Bound::Excluded(ts) => clamp(ts).saturating_sub(1),
        Bound::Unbounded => i64::MAX,
    };
    (lo, hi)
}

impl MutationLog for SqliteMutationLog {
    fn append(&self, key: &ElementKey, mutation: Mutation) -> Result<u64> {
        let element = serde_json::to_string(key)?;
        let ts = sql_ts(mutation.timestamp)?;
        let body = serde_json::to_string(&mutation)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO mutations (element, ts, body) VALUES (?1, ?2, ?3)",
            params![element, ts, body],
        )?;
        let seq = conn.last_insert_rowid() as u64;
        debug!(element = %key, seq, kind = mutation.op.kind(), "mutation_log.append");
        Ok(seq)
    }

    fn read(&self, key: &ElementKey, bounds: TimeBounds) -> Result<Vec<LoggedMutation>> {
        let element = serde_json::to_string(key)?;
        let (lo, hi) = sql_range(&bounds);
        if lo > hi {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, body FROM mutations
             WHERE element = ?1 AND ts BETWEEN ?2 AND ?3
             ORDER BY ts, seq",
        )?;
        let rows = stmt.query_map(params![element, lo, hi], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (seq, body) = row?;
            out.push(LoggedMutation {
                seq: seq as u64,
                mutation: serde_json::from_str(&body)?,
            });
        }
        Ok(out)
    }

    fn keys(&self) -> Result<Vec<ElementKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT element FROM mutations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(serde_json::from_str::<ElementKey>(&row?)?);
        }
        keys.sort();
        Ok(keys)
    }
}
