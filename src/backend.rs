//! Key-value stores behind the distributed cache
//!
//! `MemoryBackend` is the in-process substitute. `CacacheBackend` keeps
//! entries in a content-addressed directory that several processes can share.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvBackend: Send + Sync {
    fn name(&self) -> String;

    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove every key starting with `prefix`.
    async fn flush(&self, prefix: &str) -> CacheResult<()>;

    /// Number of live keys starting with `prefix`.
    async fn len(&self, prefix: &str) -> CacheResult<u64>;
}

/// Open the backend named by `url`.
///
/// `memory://` selects the in-process store; `cacache://<dir>` and
/// `file://<dir>` a shared directory. Nothing else is supported.
pub async fn connect_backend(url: &str) -> CacheResult<Arc<dyn KvBackend>> {
    if url == "memory://" || url == "memory" {
        return Ok(Arc::new(MemoryBackend::new()));
    }
    let dir = url
        .strip_prefix("cacache://")
        .or_else(|| url.strip_prefix("file://"))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| CacheError::UnsupportedBackend {
            url: url.to_string(),
        })?;
    Ok(Arc::new(CacacheBackend::open(dir).await?))
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)));
        self.entries
            .lock()
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn flush(&self, prefix: &str) -> CacheResult<()> {
        self.entries.lock().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn len(&self, prefix: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|(k, (_, expires_at))| k.starts_with(prefix) && *expires_at > now)
            .count() as u64)
    }
}

/// Stored payload plus its wall-clock expiry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at_ms: i64,
    payload: Vec<u8>,
}

impl Envelope {
    fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() >= self.expires_at_ms
    }
}

#[derive(Debug, Clone)]
pub struct CacacheBackend {
    dir: PathBuf,
}

impl CacacheBackend {
    pub async fn open(dir: impl AsRef<Path>) -> CacheResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::Io {
                path: dir.clone(),
                details: e.to_string(),
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn backend_error(&self, e: impl std::fmt::Display) -> CacheError {
        CacheError::Backend {
            backend: self.name(),
            details: e.to_string(),
        }
    }

    /// Keys present in the index, expired or not.
    fn stored_keys(&self, prefix: &str) -> CacheResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        cacache::index::ls(&self.dir)
            .map(|entry| entry.map(|m| m.key))
            .filter(|key| key.as_ref().map_or(true, |k| k.starts_with(prefix)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.backend_error(e))
    }

    async fn read_envelope(&self, key: &str) -> CacheResult<Option<Envelope>> {
        let bytes = match cacache::read(&self.dir, key).await {
            Ok(bytes) => bytes,
            Err(cacache::Error::EntryNotFound(_, _)) => return Ok(None),
            Err(e) => return Err(self.backend_error(e)),
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| self.backend_error(e))
    }
}

#[async_trait]
impl KvBackend for CacacheBackend {
    fn name(&self) -> String {
        "cacache".to_string()
    }

    async fn ping(&self) -> CacheResult<()> {
        let metadata = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| self.backend_error(e))?;
        if metadata.permissions().readonly() {
            return Err(self.backend_error("cache directory is read-only"));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let Some(envelope) = self.read_envelope(key).await? else {
            return Ok(None);
        };
        if envelope.is_expired() {
            self.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(envelope.payload))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let envelope = Envelope {
            expires_at_ms: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            payload: value,
        };
        let bytes = bincode::serialize(&envelope).map_err(|e| self.backend_error(e))?;
        cacache::write(&self.dir, key, bytes)
            .await
            .map_err(|e| self.backend_error(e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match cacache::remove(&self.dir, key).await {
            Ok(()) | Err(cacache::Error::EntryNotFound(_, _)) => Ok(()),
            Err(e) => Err(self.backend_error(e)),
        }
    }

    async fn flush(&self, prefix: &str) -> CacheResult<()> {
        for key in self.stored_keys(prefix)? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn len(&self, prefix: &str) -> CacheResult<u64> {
        let mut live = 0;
        for key in self.stored_keys(prefix)? {
            if self
                .read_envelope(&key)
                .await?
                .is_some_and(|envelope| !envelope.is_expired())
            {
                live += 1;
            }
        }
        Ok(live)
    }
}
