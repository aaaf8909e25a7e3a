//! SQLite-backed embedding cache.
//!
//! Keyed by student name and the SHA-256 digest of the source image, so an
//! edited or replaced photo is re-embedded on the next gallery load.

use crate::types::Embedding;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt cached embedding for {name}: {source}")]
    Corrupt {
        name: String,
        source: serde_json::Error,
    },
    #[error("failed to encode embedding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Hex SHA-256 of `bytes`, used as the cache validity key.
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    path: PathBuf,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, CacheError> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS embeddings (
                name      TEXT PRIMARY KEY NOT NULL,
                digest    TEXT NOT NULL,
                embedding TEXT NOT NULL
            );",
        )?;
        Ok(conn)
    }

    /// Cached embedding for `name`, only if it was computed from an image
    /// with the same `digest`.
    pub fn get(&self, name: &str, digest: &str) -> Result<Option<Embedding>, CacheError> {
        let conn = self.open()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT embedding FROM embeddings WHERE name = ?1 AND digest = ?2",
                params![name, digest],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| {
            serde_json::from_str(&j).map_err(|source| CacheError::Corrupt {
                name: name.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn put(&self, name: &str, digest: &str, embedding: &Embedding) -> Result<(), CacheError> {
        let json = serde_json::to_string(embedding)?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO embeddings (name, digest, embedding) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET digest = excluded.digest, embedding = excluded.embedding",
            params![name, digest, json],
        )?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.open()?;
        let n = conn.execute("DELETE FROM embeddings WHERE name = ?1", params![name])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_requires_matching_digest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("embeddings.db"));
        let emb = Embedding::new(vec![0.25, -0.5, 1.0]);

        cache.put("Alice", "abc", &emb).unwrap();
        assert_eq!(cache.get("Alice", "abc").unwrap(), Some(emb));
        assert_eq!(cache.get("Alice", "def").unwrap(), None);
        assert_eq!(cache.get("Bob", "abc").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("embeddings.db"));

        cache.put("Alice", "v1", &Embedding::new(vec![1.0])).unwrap();
        cache.put("Alice", "v2", &Embedding::new(vec![2.0])).unwrap();

        assert_eq!(cache.get("Alice", "v1").unwrap(), None);
        assert_eq!(cache.get("Alice", "v2").unwrap(), Some(Embedding::new(vec![2.0])));
        assert!(cache.remove("Alice").unwrap());
        assert!(!cache.remove("Alice").unwrap());
    }

    #[test]
    fn test_digest_hex() {
        assert_eq!(
            digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
