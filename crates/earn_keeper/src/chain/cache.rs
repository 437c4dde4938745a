//! SQLite cache for immutable balance-history pages.
//!
//! Only closed windows are cached: history before a past `to` bound can no longer change.

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Content-addressed cache. Key = SHA-256 of namespace and normalized request.
pub struct Cache {
    conn: Mutex<Connection>,
}

impl Cache {
    /// Open or create cache at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history_pages (
                key TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                value BLOB NOT NULL,
                created_utc INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_namespace ON history_pages(namespace);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn key_for(namespace: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM history_pages WHERE key = ?1")?;
        let row = stmt
            .query_row([key], |r| r.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(row)
    }

    pub fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let created = time::OffsetDateTime::now_utc().unix_timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO history_pages (key, namespace, value, created_utc) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![key, namespace, value, created],
        )?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_vec(value)?;
        self.put(namespace, key, &raw)
    }

    /// Number of cached entries in `namespace`.
    pub fn count(&self, namespace: &str) -> Result<u64, CacheError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history_pages WHERE namespace = ?1",
            [namespace],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn cache_key_deterministic_and_namespaced() {
        let k1 = Cache::key_for("history", r#"{"account":"x","from":1}"#);
        let k2 = Cache::key_for("history", r#"{"account":"x","from":1}"#);
        let k3 = Cache::key_for("other", r#"{"account":"x","from":1}"#);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn cache_get_put_on_disk() {
        let tmp = NamedTempFile::new().unwrap();
        let cache = Cache::open(tmp.path()).unwrap();
        let key = Cache::key_for("history", "req1");
        cache.put("history", &key, b"hello").unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(b"hello".to_vec()));
        assert!(cache.get("nonexistent").unwrap().is_none());
        assert_eq!(cache.count("history").unwrap(), 1);
    }

    #[test]
    fn cache_json_roundtrip() {
        let cache = Cache::in_memory().unwrap();
        let key = Cache::key_for("history", "req2");
        cache.put_json("history", &key, &vec![1u64, 2, 3]).unwrap();
        let back: Option<Vec<u64>> = cache.get_json(&key).unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }
}
