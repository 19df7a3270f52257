use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::backend::{KvBackend, MemoryBackend, connect_backend};
use crate::cache::{
    CacheEntry, CacheStatsReport, CacheValue, LocalCache, LocalCacheStats, SchemaCacheStore,
    SourceFingerprint,
};
use crate::codec;
use crate::config::CacheSettings;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributedCacheStats {
    pub available: bool,
    pub backend: String,
    pub prefix: String,
    pub default_ttl_seconds: u64,
    pub backend_keys: Option<u64>,
    pub local: LocalCacheStats,
}

/// Shared cache with a transparent local fallback.
///
/// Every write is mirrored into an embedded [`LocalCache`]. The first backend
/// error flips the cache to local-only mode until [`reconnect`] succeeds.
///
/// [`reconnect`]: DistributedCache::reconnect
pub struct DistributedCache {
    backend: Option<Arc<dyn KvBackend>>,
    available: AtomicBool,
    local: LocalCache,
    prefix: String,
    default_ttl: Duration,
}

impl DistributedCache {
    /// Pick a backend from settings.
    ///
    /// A forced substitute wins, then a configured URL; the substitute is
    /// auto-selected only when no URL was tried. A failed URL leaves the
    /// cache local-only.
    pub async fn connect(settings: &CacheSettings) -> Self {
        let (backend, available) = Self::select_backend(settings).await;
        Self::assemble(backend, available, settings)
    }

    /// Use an explicitly provided backend, skipping selection.
    pub fn with_backend(backend: Arc<dyn KvBackend>, settings: &CacheSettings) -> Self {
        Self::assemble(Some(backend), true, settings)
    }

    fn assemble(
        backend: Option<Arc<dyn KvBackend>>,
        available: bool,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            backend,
            available: AtomicBool::new(available),
            local: LocalCache::from_settings(settings),
            prefix: settings.key_prefix.clone(),
            default_ttl: settings.default_ttl(),
        }
    }

    async fn select_backend(settings: &CacheSettings) -> (Option<Arc<dyn KvBackend>>, bool) {
        if settings.force_in_memory_backend {
            tracing::info!("using forced in-memory cache backend");
            return (Some(Arc::new(MemoryBackend::new())), true);
        }

        let Some(url) = settings.backend_url.as_deref() else {
            tracing::info!("no cache backend configured, using in-memory substitute");
            return (Some(Arc::new(MemoryBackend::new())), true);
        };

        match connect_backend(url).await {
            Ok(backend) => match backend.ping().await {
                Ok(()) => {
                    tracing::info!(backend = %backend.name(), url, "connected to cache backend");
                    (Some(backend), true)
                }
                Err(e) => {
                    tracing::warn!(error = %e, url, "cache backend unreachable, using local cache only");
                    (Some(backend), false)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, url, "cache backend unavailable, using local cache only");
                (None, false)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn backend_name(&self) -> String {
        self.backend
            .as_ref()
            .map_or_else(|| "none".to_string(), |b| b.name())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// Probe the backend again and restore availability on success.
    pub async fn reconnect(&self) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        match backend.ping().await {
            Ok(()) => {
                if !self.available.swap(true, Ordering::AcqRel) {
                    tracing::info!(backend = %backend.name(), "cache backend available again");
                }
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "cache backend still unavailable");
                false
            }
        }
    }

    fn active_backend(&self) -> Option<&Arc<dyn KvBackend>> {
        if self.is_available() {
            self.backend.as_ref()
        } else {
            None
        }
    }

    fn mark_unavailable(&self, operation: &str, error: &CacheError) {
        if self.available.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                operation,
                error = %error,
                backend = %self.backend_name(),
                "cache backend failed, falling back to local cache"
            );
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn meta_key(&self, key: &str) -> String {
        format!("{}{}:meta", self.prefix, key)
    }

    async fn write_through(
        backend: &Arc<dyn KvBackend>,
        key: String,
        frame: Vec<u8>,
        meta: Option<(String, Vec<u8>)>,
        ttl: Duration,
    ) -> CacheResult<()> {
        backend.set_ex(&key, frame, ttl).await?;
        if let Some((meta_key, meta)) = meta {
            backend.set_ex(&meta_key, meta, ttl).await?;
        }
        Ok(())
    }

    async fn remote_staleness(&self, backend: &Arc<dyn KvBackend>, key: &str, source_file: &Path) -> bool {
        match backend.get(&self.meta_key(key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<SourceFingerprint>(&bytes) {
                Ok(source) => source.is_stale(source_file).await,
                Err(e) => {
                    tracing::warn!(key, error = %e, "unreadable cache metadata record");
                    true
                }
            },
            Ok(None) => true,
            Err(e) => {
                self.mark_unavailable("check_staleness", &e);
                true
            }
        }
    }
}

#[async_trait]
impl SchemaCacheStore for DistributedCache {
    fn name(&self) -> &'static str {
        "distributed"
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(backend) = self.active_backend() {
            match backend.get(&self.prefixed(key)).await {
                Ok(Some(frame)) => match codec::decode_value(&frame) {
                    Ok(value) => {
                        tracing::debug!(key, "distributed cache hit");
                        return Some(value);
                    }
                    Err(e) => {
                        tracing::warn!(key, error = %e, "undecodable cache frame, trying local mirror");
                    }
                },
                Ok(None) => {
                    tracing::debug!(key, "distributed cache miss");
                    return None;
                }
                Err(e) => self.mark_unavailable("get", &e),
            }
        }
        self.local.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        source_file: Option<&Path>,
    ) -> CacheResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let prefixed = self.prefixed(key);
        let frame = codec::encode_value(&prefixed, &value)?;

        let source = match source_file {
            Some(path) => SourceFingerprint::capture(path).await,
            None => None,
        };

        if let Some(backend) = self.active_backend() {
            let meta = match &source {
                Some(source) => {
                    let bytes = serde_json::to_vec(source).map_err(|e| CacheError::Serialization {
                        key: self.meta_key(key),
                        details: e.to_string(),
                    })?;
                    Some((self.meta_key(key), bytes))
                }
                None => None,
            };
            if let Err(e) = Self::write_through(backend, prefixed, frame, meta, ttl).await {
                self.mark_unavailable("set", &e);
            }
        }

        self.local
            .insert_entry(key, CacheEntry::new(value, ttl).with_source(source))
            .await;
        Ok(())
    }

    async fn invalidate(&self, key: &str) {
        if let Some(backend) = self.active_backend() {
            let result = match backend.delete(&self.prefixed(key)).await {
                Ok(()) => backend.delete(&self.meta_key(key)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.mark_unavailable("invalidate", &e);
            }
        }
        self.local.invalidate(key).await;
    }

    async fn clear(&self) {
        if let Some(backend) = self.active_backend()
            && let Err(e) = backend.flush(&self.prefix).await
        {
            self.mark_unavailable("clear", &e);
        }
        self.local.clear().await;
    }

    async fn check_staleness(&self, key: &str, source_file: &Path) -> bool {
        if let Some(entry) = self.local.get_entry(key).await {
            return entry.is_stale(source_file).await;
        }
        match self.active_backend() {
            Some(backend) => self.remote_staleness(backend, key, source_file).await,
            None => true,
        }
    }

    async fn stats(&self) -> CacheStatsReport {
        let backend_keys = match self.active_backend() {
            Some(backend) => match backend.len(&self.prefix).await {
                Ok(count) => Some(count),
                Err(e) => {
                    self.mark_unavailable("stats", &e);
                    None
                }
            },
            None => None,
        };

        CacheStatsReport::Distributed(DistributedCacheStats {
            available: self.is_available(),
            backend: self.backend_name(),
            prefix: self.prefix.clone(),
            default_ttl_seconds: self.default_ttl.as_secs(),
            backend_keys,
            local: self.local.local_stats().await,
        })
    }
}
