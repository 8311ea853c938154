//! Durable vector index cache.
//!
//! One row per collection holding the item list, its fingerprint, and the
//! flat vector matrix (little-endian `f32`). Uses `rusqlite` synchronously;
//! rows are small enough that the calling task is not held for long.
//! WAL mode lets concurrent processes read while one rebuilds.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::errors::IndexError;
use super::vector_index::IndexItem;

/// File name of the cache database inside the cache directory.
pub const CACHE_FILE_NAME: &str = "vector_indexes.db";

/// A persisted index snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex {
    pub fingerprint: String,
    pub items: Vec<IndexItem>,
    pub dimension: usize,
    /// Row-major, `items.len() * dimension` values.
    pub vectors: Vec<f32>,
    pub built_at: DateTime<Utc>,
}

/// SQLite handle for cached indexes.
pub struct IndexCache {
    conn: Mutex<Connection>,
}

impl IndexCache {
    /// Open (or create) the cache database inside `dir`.
    pub fn open_in_dir(dir: &Path) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir).map_err(|e| IndexError::Cache {
            reason: format!("failed to create {}: {e}", dir.display()),
        })?;
        Self::open(&dir.join(CACHE_FILE_NAME))
    }

    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Non-durable cache, for tests and throwaway runs.
    pub fn in_memory() -> Result<Self, IndexError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vector_indexes (
                collection TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                items TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                vectors BLOB NOT NULL,
                built_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a collection. Rows that fail to decode are reported as absent so
    /// the caller rebuilds and overwrites them.
    pub fn load(&self, collection: &str) -> Result<Option<CachedIndex>, IndexError> {
        let row = self
            .conn()
            .query_row(
                "SELECT fingerprint, items, dimension, vectors, built_at
                 FROM vector_indexes WHERE collection = ?1",
                params![collection],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((fingerprint, items_json, dimension, blob, built_at)) = row else {
            return Ok(None);
        };

        match decode_row(&items_json, dimension, &blob, &built_at) {
            Ok((items, dimension, vectors, built_at)) => Ok(Some(CachedIndex {
                fingerprint,
                items,
                dimension,
                vectors,
                built_at,
            })),
            Err(reason) => {
                tracing::warn!(collection, %reason, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Insert or replace a collection in a single transaction.
    pub fn store(&self, collection: &str, index: &CachedIndex) -> Result<(), IndexError> {
        let items_json = serde_json::to_string(&index.items)?;
        let blob: Vec<u8> = index.vectors.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO vector_indexes
                (collection, fingerprint, items, dimension, vectors, built_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                collection,
                index.fingerprint,
                items_json,
                index.dimension as i64,
                blob,
                index.built_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Drop a collection. Returns whether it existed.
    pub fn remove(&self, collection: &str) -> Result<bool, IndexError> {
        let n = self.conn().execute(
            "DELETE FROM vector_indexes WHERE collection = ?1",
            params![collection],
        )?;
        Ok(n > 0)
    }

    /// Names of all cached collections, sorted.
    pub fn collections(&self) -> Result<Vec<String>, IndexError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT collection FROM vector_indexes ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

type DecodedRow = (Vec<IndexItem>, usize, Vec<f32>, DateTime<Utc>);

fn decode_row(
    items_json: &str,
    dimension: i64,
    blob: &[u8],
    built_at: &str,
) -> Result<DecodedRow, String> {
    let items: Vec<IndexItem> =
        serde_json::from_str(items_json).map_err(|e| format!("items: {e}"))?;
    let dimension = usize::try_from(dimension).map_err(|_| "negative dimension".to_string())?;
    if dimension == 0 && !items.is_empty() {
        return Err("zero dimension with non-empty items".to_string());
    }
    let expected = items
        .len()
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| format!("dimension {dimension} overflows the blob size"))?;
    if blob.len() != expected {
        return Err(format!(
            "vector blob holds {} bytes, expected {expected}",
            blob.len()
        ));
    }
    let vectors = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let built_at = DateTime::parse_from_rfc3339(built_at)
        .map_err(|e| format!("built_at: {e}"))?
        .with_timezone(&Utc);
    Ok((items, dimension, vectors, built_at))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
