//! Versioned response storage
//!
//! One bucket per deployed version, holding (method, url) -> response
//! pairs, plus a few named markers recording lifecycle state.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};

use super::fetcher::HttpResponse;
use crate::cache::CacheStorage;
use crate::error::CacheError;

type Result<T> = std::result::Result<T, CacheError>;

/// Bumped whenever the bucket layout changes
const SCHEMA_VERSION: i32 = 1;

/// Storage for cached responses.
pub trait ResponseStore: Send + Sync {
    /// Names of every bucket holding at least one response.
    fn buckets(&self) -> Result<Vec<String>>;

    fn get(&self, bucket: &str, method: &str, url: &str) -> Result<Option<HttpResponse>>;

    fn put(&self, bucket: &str, method: &str, url: &str, response: &HttpResponse) -> Result<()>;

    /// Store GET responses all together or not at all.
    fn put_all(&self, bucket: &str, entries: &[(String, HttpResponse)]) -> Result<()>;

    /// Delete a bucket, returning how many responses it held.
    fn delete_bucket(&self, bucket: &str) -> Result<usize>;

    fn entry_count(&self, bucket: &str) -> Result<usize>;

    fn marker(&self, name: &str) -> Result<Option<String>>;

    fn set_marker(&self, name: &str, value: Option<&str>) -> Result<()>;
}

impl<S: ResponseStore + ?Sized> ResponseStore for Arc<S> {
    fn buckets(&self) -> Result<Vec<String>> {
        (**self).buckets()
    }

    fn get(&self, bucket: &str, method: &str, url: &str) -> Result<Option<HttpResponse>> {
        (**self).get(bucket, method, url)
    }

    fn put(&self, bucket: &str, method: &str, url: &str, response: &HttpResponse) -> Result<()> {
        (**self).put(bucket, method, url, response)
    }

    fn put_all(&self, bucket: &str, entries: &[(String, HttpResponse)]) -> Result<()> {
        (**self).put_all(bucket, entries)
    }

    fn delete_bucket(&self, bucket: &str) -> Result<usize> {
        (**self).delete_bucket(bucket)
    }

    fn entry_count(&self, bucket: &str) -> Result<usize> {
        (**self).entry_count(bucket)
    }

    fn marker(&self, name: &str) -> Result<Option<String>> {
        (**self).marker(name)
    }

    fn set_marker(&self, name: &str, value: Option<&str>) -> Result<()> {
        (**self).set_marker(name, value)
    }
}

type BucketMap = BTreeMap<String, HashMap<(String, String), HttpResponse>>;

/// In-memory [`ResponseStore`].
#[derive(Default)]
pub struct MemoryResponseStore {
    buckets: Mutex<BucketMap>,
    markers: Mutex<HashMap<String, String>>,
}

impl MemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets_lock(&self) -> MutexGuard<'_, BucketMap> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseStore for MemoryResponseStore {
    fn buckets(&self) -> Result<Vec<String>> {
        Ok(self
            .buckets_lock()
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn get(&self, bucket: &str, method: &str, url: &str) -> Result<Option<HttpResponse>> {
        Ok(self
            .buckets_lock()
            .get(bucket)
            .and_then(|b| b.get(&(method.to_string(), url.to_string())))
            .cloned())
    }

    fn put(&self, bucket: &str, method: &str, url: &str, response: &HttpResponse) -> Result<()> {
        self.buckets_lock()
            .entry(bucket.to_string())
            .or_default()
            .insert((method.to_string(), url.to_string()), response.clone());
        Ok(())
    }

    fn put_all(&self, bucket: &str, entries: &[(String, HttpResponse)]) -> Result<()> {
        let mut buckets = self.buckets_lock();
        let target = buckets.entry(bucket.to_string()).or_default();
        for (url, response) in entries {
            target.insert(("GET".to_string(), url.clone()), response.clone());
        }
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<usize> {
        Ok(self
            .buckets_lock()
            .remove(bucket)
            .map(|b| b.len())
            .unwrap_or(0))
    }

    fn entry_count(&self, bucket: &str) -> Result<usize> {
        Ok(self.buckets_lock().get(bucket).map(|b| b.len()).unwrap_or(0))
    }

    fn marker(&self, name: &str) -> Result<Option<String>> {
        let markers = self.markers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(markers.get(name).cloned())
    }

    fn set_marker(&self, name: &str, value: Option<&str>) -> Result<()> {
        let mut markers = self.markers.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(v) => markers.insert(name.to_string(), v.to_string()),
            None => markers.remove(name),
        };
        Ok(())
    }
}

/// SQLite-backed [`ResponseStore`] that survives restarts.
pub struct SqliteResponseStore {
    conn: Mutex<Connection>,
}

impl SqliteResponseStore {
    /// Open the store in the default cache directory
    pub fn open() -> Result<Self> {
        let dir = CacheStorage::cache_dir()?;
        Self::open_at(&dir)
    }

    /// Open `offline.db` inside `dir`
    pub fn open_at(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = dir.join("offline.db");
        let conn = Connection::open(&db_path)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Offline store schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            std::fs::remove_file(&db_path)
                .map_err(|e| CacheError::Io(format!("Failed to remove offline DB: {}", e)))?;
            return Self::open_at(dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                bucket TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (bucket, method, url)
            );

            CREATE TABLE IF NOT EXISTS markers (
                name TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Io(format!("Lock poisoned: {}", e)))
    }

    fn insert(conn: &Connection, bucket: &str, method: &str, url: &str, response: &HttpResponse) -> Result<()> {
        let headers = serde_json::to_string(&response.headers).map_err(|e| CacheError::Corrupt {
            key: url.to_string(),
            reason: e.to_string(),
        })?;

        conn.execute(
            "INSERT OR REPLACE INTO responses (bucket, method, url, status, headers, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                bucket,
                method,
                url,
                response.status,
                headers,
                response.body,
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }
}

impl ResponseStore for SqliteResponseStore {
    fn buckets(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT bucket FROM responses ORDER BY bucket")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn get(&self, bucket: &str, method: &str, url: &str) -> Result<Option<HttpResponse>> {
        let conn = self.conn()?;
        let row: Option<(u16, String, Vec<u8>)> = conn
            .query_row(
                "SELECT status, headers, body FROM responses
                 WHERE bucket = ?1 AND method = ?2 AND url = ?3",
                params![bucket, method, url],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((status, headers, body)) = row else {
            return Ok(None);
        };

        match serde_json::from_str(&headers) {
            Ok(headers) => Ok(Some(HttpResponse {
                status,
                headers,
                body,
            })),
            Err(e) => {
                log::warn!("Dropping corrupt cached response for {}: {}", url, e);
                conn.execute(
                    "DELETE FROM responses WHERE bucket = ?1 AND method = ?2 AND url = ?3",
                    params![bucket, method, url],
                )?;
                Ok(None)
            }
        }
    }

    fn put(&self, bucket: &str, method: &str, url: &str, response: &HttpResponse) -> Result<()> {
        let conn = self.conn()?;
        Self::insert(&conn, bucket, method, url, response)
    }

    fn put_all(&self, bucket: &str, entries: &[(String, HttpResponse)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (url, response) in entries {
            Self::insert(&tx, bucket, "GET", url, response)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM responses WHERE bucket = ?1", [bucket])?;
        Ok(deleted)
    }

    fn entry_count(&self, bucket: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE bucket = ?1",
            [bucket],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn marker(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM markers WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_marker(&self, name: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        match value {
            Some(v) => conn.execute(
                "INSERT OR REPLACE INTO markers (name, value) VALUES (?1, ?2)",
                params![name, v],
            )?,
            None => conn.execute("DELETE FROM markers WHERE name = ?1", [name])?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn ResponseStore) {
        let page = HttpResponse::ok("<html>home</html>");
        store.put("pulsesync-v1", "GET", "https://a/", &page).unwrap();

        assert_eq!(store.get("pulsesync-v1", "GET", "https://a/").unwrap(), Some(page));
        assert_eq!(store.get("pulsesync-v1", "HEAD", "https://a/").unwrap(), None);
        assert_eq!(store.get("pulsesync-v2", "GET", "https://a/").unwrap(), None);

        store
            .put_all(
                "pulsesync-v2",
                &[
                    ("https://a/".to_string(), HttpResponse::ok("v2")),
                    ("https://a/app.js".to_string(), HttpResponse::ok("js")),
                ],
            )
            .unwrap();
        assert_eq!(store.entry_count("pulsesync-v2").unwrap(), 2);
        assert_eq!(
            store.buckets().unwrap(),
            vec!["pulsesync-v1".to_string(), "pulsesync-v2".to_string()]
        );

        assert_eq!(store.delete_bucket("pulsesync-v1").unwrap(), 1);
        assert_eq!(store.delete_bucket("pulsesync-v1").unwrap(), 0);
        assert_eq!(store.buckets().unwrap(), vec!["pulsesync-v2".to_string()]);

        assert_eq!(store.marker("active").unwrap(), None);
        store.set_marker("active", Some("v2")).unwrap();
        assert_eq!(store.marker("active").unwrap(), Some("v2".to_string()));
        store.set_marker("active", None).unwrap();
        assert_eq!(store.marker("active").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryResponseStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        let temp = TempDir::new().unwrap();
        exercise(&SqliteResponseStore::open_at(temp.path()).unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = SqliteResponseStore::open_at(temp.path()).unwrap();
            store
                .put("pulsesync-v1", "GET", "https://a/", &HttpResponse::ok("home"))
                .unwrap();
            store.set_marker("active", Some("v1")).unwrap();
        }

        let store = SqliteResponseStore::open_at(temp.path()).unwrap();
        assert_eq!(store.marker("active").unwrap(), Some("v1".to_string()));
        assert_eq!(
            store.get("pulsesync-v1", "GET", "https://a/").unwrap().unwrap().body,
            b"home".to_vec()
        );
    }
}
