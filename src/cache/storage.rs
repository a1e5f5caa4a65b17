//! SQLite-based cache storage with file blob support
//!
//! Stores small values inline in SQLite, large values (>10KB) as files.
//! Backs the durable variant of [`TtlCache`](super::TtlCache).

use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::ttl::{StoredEntry, TtlBackend};
use crate::error::CacheError;

/// Bumped whenever the table layout changes; older files are discarded
const SCHEMA_VERSION: i32 = 1;

/// Values larger than this are stored as external blobs
const INLINE_THRESHOLD: usize = 10 * 1024; // 10KB

type Result<T> = std::result::Result<T, CacheError>;

/// Durable [`TtlBackend`]: rows in SQLite, oversized values in blob files.
pub struct CacheStorage {
    conn: Mutex<Connection>,
    blobs_dir: PathBuf,
}

impl CacheStorage {
    /// Open or create cache storage at the default XDG cache location
    pub fn open() -> Result<Self> {
        let cache_dir = Self::cache_dir()?;
        Self::open_at(&cache_dir)
    }

    /// Get the cache directory path (~/.cache/pulsesync on Linux)
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(CacheError::NoHome)?;
        Ok(cache_base.join("pulsesync"))
    }

    /// Open cache storage at a specific directory
    pub fn open_at(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = cache_dir.join("cache.db");
        let blobs_dir = cache_dir.join("blobs");
        std::fs::create_dir_all(&blobs_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create blobs dir: {}", e)))?;

        let conn = Connection::open(&db_path)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Cache schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            Self::discard_files(&db_path, &blobs_dir)?;
            return Self::open_at(cache_dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY NOT NULL,
                data TEXT,
                blob_path TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_expires_at ON cache_entries(expires_at);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Mutex::new(conn),
            blobs_dir,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Io(format!("Lock poisoned: {}", e)))
    }

    /// Write a value to `blobs/<2-char shard>/<sha256>.json`.
    fn write_blob(&self, key: &str, data: &[u8]) -> Result<String> {
        let safe_key = blob_name(key);
        let shard = &safe_key[..2.min(safe_key.len())];
        let shard_dir = self.blobs_dir.join(shard);
        std::fs::create_dir_all(&shard_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create shard dir: {}", e)))?;

        let filename = format!("{}.json", safe_key);
        let rel_path = format!("{}/{}", shard, filename);
        let full_path = shard_dir.join(&filename);

        std::fs::write(&full_path, data)
            .map_err(|e| CacheError::Io(format!("Failed to write blob: {}", e)))?;

        Ok(rel_path)
    }

    fn remove_blob(&self, rel_path: &str) {
        let full_path = self.blobs_dir.join(rel_path);
        if let Err(e) = std::fs::remove_file(&full_path) {
            log::debug!("Failed to remove blob {}: {}", rel_path, e);
        }
    }

    fn blob_path_of(conn: &Connection, key: &str) -> Result<Option<String>> {
        let path: Option<Option<String>> = conn
            .query_row(
                "SELECT blob_path FROM cache_entries WHERE cache_key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path.flatten())
    }

    /// Delete the database file and every blob.
    fn discard_files(db_path: &Path, blobs_dir: &Path) -> Result<()> {
        if db_path.exists() {
            std::fs::remove_file(db_path)
                .map_err(|e| CacheError::Io(format!("Failed to remove cache DB: {}", e)))?;
        }
        if blobs_dir.exists() {
            std::fs::remove_dir_all(blobs_dir)
                .map_err(|e| CacheError::Io(format!("Failed to remove blobs dir: {}", e)))?;
        }
        Ok(())
    }
}

/// Keys may contain characters that are not safe in file names.
fn blob_name(key: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

impl TtlBackend for CacheStorage {
    fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        let conn = self.conn()?;

        let row: Option<(Option<String>, Option<String>, i64, i64)> = conn
            .query_row(
                "SELECT data, blob_path, created_at, expires_at FROM cache_entries
                 WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((data, blob_path, created_at_ms, expires_at_ms)) = row else {
            return Ok(None);
        };

        let data = match (data, blob_path) {
            (Some(data), None) => data.into_bytes(),
            (None, Some(blob_path)) => match std::fs::read(self.blobs_dir.join(&blob_path)) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("Failed to read blob {}: {}", blob_path, e);
                    // Delete stale entry
                    let _ = conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", [key]);
                    return Ok(None);
                }
            },
            _ => return Ok(None),
        };

        Ok(Some(StoredEntry {
            data,
            created_at_ms,
            expires_at_ms,
        }))
    }

    fn write(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        let conn = self.conn()?;

        if let Some(old_blob) = Self::blob_path_of(&conn, key)? {
            self.remove_blob(&old_blob);
        }

        match std::str::from_utf8(&entry.data) {
            Ok(text) if entry.data.len() <= INLINE_THRESHOLD => {
                conn.execute(
                    "INSERT OR REPLACE INTO cache_entries
                     (cache_key, data, blob_path, created_at, expires_at, size_bytes)
                     VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
                    params![
                        key,
                        text,
                        entry.created_at_ms,
                        entry.expires_at_ms,
                        entry.data.len()
                    ],
                )?;
            }
            _ => {
                let blob_path = self.write_blob(key, &entry.data)?;
                conn.execute(
                    "INSERT OR REPLACE INTO cache_entries
                     (cache_key, data, blob_path, created_at, expires_at, size_bytes)
                     VALUES (?1, NULL, ?2, ?3, ?4, ?5)",
                    params![
                        key,
                        blob_path,
                        entry.created_at_ms,
                        entry.expires_at_ms,
                        entry.data.len()
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn set_expiry(&self, key: &str, expires_at_ms: i64) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE cache_entries SET expires_at = ?1 WHERE cache_key = ?2",
            params![expires_at_ms, key],
        )?;
        Ok(updated > 0)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        if let Some(blob) = Self::blob_path_of(&conn, key)? {
            self.remove_blob(&blob);
        }
        let deleted = conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", [key])?;
        Ok(deleted > 0)
    }

    fn remove_all(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))?;

        conn.execute("DELETE FROM cache_entries", [])?;

        if self.blobs_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.blobs_dir) {
                log::warn!("Failed to clear blobs directory: {}", e);
            }
            std::fs::create_dir_all(&self.blobs_dir)
                .map_err(|e| CacheError::Io(format!("Failed to recreate blobs dir: {}", e)))?;
        }

        Ok(count as usize)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let conn = self.conn()?;

        let blobs: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT blob_path FROM cache_entries
                 WHERE expires_at < ?1 AND blob_path IS NOT NULL",
            )?;
            let rows = stmt.query_map([now_ms], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        for blob in &blobs {
            self.remove_blob(blob);
        }

        let deleted = conn.execute("DELETE FROM cache_entries WHERE expires_at < ?1", [now_ms])?;
        Ok(deleted)
    }

    fn stats(&self, now_ms: i64) -> Result<CacheStats> {
        let conn = self.conn()?;

        let total_entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))?;

        let valid_entries: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at >= ?1",
            [now_ms],
            |r| r.get(0),
        )?;

        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |r| r.get(0),
        )?;

        let (oldest, newest): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM cache_entries WHERE expires_at >= ?1",
            [now_ms],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        Ok(CacheStats {
            total_entries: total_entries as usize,
            valid_entries: valid_entries as usize,
            expired_entries: (total_entries - valid_entries) as usize,
            total_size_bytes: total_size as usize,
            oldest_entry: oldest,
            newest_entry: newest,
        })
    }
}

/// Statistics about cache state. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}
