use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheSettings;
use crate::distributed_cache::DistributedCacheStats;
use crate::error::CacheResult;
use crate::models::RuleNode;
use crate::schematron::RuleSet;

/// A value held by one of the schema caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    Tree(Arc<RuleNode>),
    Rules(Arc<RuleSet>),
    Json(#[serde(with = "json_text")] serde_json::Value),
    Text(String),
}

impl CacheValue {
    pub fn as_tree(&self) -> Option<Arc<RuleNode>> {
        match self {
            CacheValue::Tree(tree) => Some(Arc::clone(tree)),
            _ => None,
        }
    }

    pub fn as_rules(&self) -> Option<Arc<RuleSet>> {
        match self {
            CacheValue::Rules(rules) => Some(Arc::clone(rules)),
            _ => None,
        }
    }

    /// Last-resort textual form, used when no structured encoding works.
    pub fn text_repr(&self) -> String {
        match self {
            CacheValue::Text(text) => text.clone(),
            CacheValue::Json(value) => value.to_string(),
            other => format!("{:?}", other),
        }
    }
}

impl From<RuleNode> for CacheValue {
    fn from(tree: RuleNode) -> Self {
        CacheValue::Tree(Arc::new(tree))
    }
}

impl From<RuleSet> for CacheValue {
    fn from(rules: RuleSet) -> Self {
        CacheValue::Rules(Arc::new(rules))
    }
}

/// JSON values travel as their text form so non self-describing encoders
/// can carry them.
mod json_text {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, s: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(value).map_err(ser::Error::custom)?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(d)?;
        serde_json::from_str(&text).map_err(de::Error::custom)
    }
}

/// Modification time and content hash of a cache entry's source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub path: PathBuf,
    pub mtime: SystemTime,
    pub etag: String,
}

impl SourceFingerprint {
    /// Read the file's current mtime and hash, `None` when it cannot be read.
    pub async fn capture(path: &Path) -> Option<Self> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        let mtime = metadata.modified().ok()?;
        let content = tokio::fs::read(path).await.ok()?;
        Some(Self {
            path: path.to_path_buf(),
            mtime,
            etag: hex::encode(Sha256::digest(&content)),
        })
    }

    /// True when the file is gone or has been modified since capture.
    pub async fn is_stale(&self, path: &Path) -> bool {
        match current_mtime(path).await {
            Some(current) => current > self.mtime,
            None => true,
        }
    }
}

async fn current_mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Cached value with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub source: Option<SourceFingerprint>,
}

impl CacheEntry {
    pub fn new(value: CacheValue, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Utc::now(),
            ttl,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Option<SourceFingerprint>) -> Self {
        self.source = source;
        self
    }

    pub fn etag(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.etag.as_str())
    }

    pub fn file_mtime(&self) -> Option<SystemTime> {
        self.source.as_ref().map(|s| s.mtime)
    }

    pub fn is_expired(&self) -> bool {
        (Utc::now() - self.created_at)
            .to_std()
            .is_ok_and(|age| age > self.ttl)
    }

    /// Entries stored without a source file are always stale.
    pub async fn is_stale(&self, source_file: &Path) -> bool {
        match &self.source {
            Some(source) => source.is_stale(source_file).await,
            None => true,
        }
    }
}

/// Receiver for cache events. Implementations must not block.
pub trait CacheMetricsRecorder: Send + Sync + Debug {
    fn record_hit(&self, elapsed: Duration);
    fn record_miss(&self, elapsed: Duration);
    fn record_eviction(&self);
    fn record_size(&self, entries: u64);

    fn snapshot(&self) -> Option<MetricsSnapshot> {
        None
    }
}

/// Atomic counter implementation of [`CacheMetricsRecorder`]
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    response_micros: AtomicU64,
    size: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let (hit_rate, avg_response_time_ms) = if lookups > 0 {
            (
                hits as f64 / lookups as f64,
                self.response_micros.load(Ordering::Relaxed) as f64 / lookups as f64 / 1000.0,
            )
        } else {
            (0.0, 0.0)
        };

        MetricsSnapshot {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            avg_response_time_ms,
            size: self.size.load(Ordering::Relaxed),
        }
    }

    fn add_response_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_micros.fetch_add(micros, Ordering::Relaxed);
    }
}

impl CacheMetricsRecorder for CacheMetrics {
    fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.add_response_time(elapsed);
    }

    fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.add_response_time(elapsed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_size(&self, entries: u64) {
        self.size.store(entries, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Option<MetricsSnapshot> {
        Some(self.current())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub avg_response_time_ms: f64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalCacheStats {
    pub entries: u64,
    pub max_entries: u64,
    pub default_ttl_seconds: u64,
    pub metrics: Option<MetricsSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheStatsReport {
    Local(LocalCacheStats),
    Distributed(DistributedCacheStats),
}

/// Contract shared by the local and distributed caches.
///
/// Backend trouble is never surfaced from reads; only `set` can fail, and
/// only when a value cannot be encoded at all.
#[async_trait]
pub trait SchemaCacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Option<CacheValue>;

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        source_file: Option<&Path>,
    ) -> CacheResult<()>;

    async fn invalidate(&self, key: &str);

    async fn clear(&self);

    /// True if the entry is missing or `source_file` changed since it was set.
    async fn check_staleness(&self, key: &str, source_file: &Path) -> bool;

    async fn stats(&self) -> CacheStatsReport;
}

/// In-process TTL cache backed by moka
pub struct LocalCache {
    entries: Cache<String, Arc<CacheEntry>>,
    default_ttl: Duration,
    max_entries: u64,
    metrics: Option<Arc<dyn CacheMetricsRecorder>>,
}

impl LocalCache {
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        let entries = Cache::builder().max_capacity(max_entries).build();

        Self {
            entries,
            default_ttl,
            max_entries,
            metrics: None,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_entries, settings.default_ttl()).with_metrics(Arc::new(CacheMetrics::new()))
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&Arc<dyn CacheMetricsRecorder>> {
        self.metrics.as_ref()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Live, unexpired entry for `key`, evicting it if expired.
    pub async fn get_entry(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(key).await?;
        if entry.is_expired() {
            self.entries.invalidate(key).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_eviction();
            }
            return None;
        }
        Some(entry)
    }

    pub async fn insert_entry(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), Arc::new(entry)).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_size(self.entries.entry_count());
        }
    }

    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn local_stats(&self) -> LocalCacheStats {
        let entries = self.entry_count().await;
        if let Some(metrics) = &self.metrics {
            metrics.record_size(entries);
        }
        LocalCacheStats {
            entries,
            max_entries: self.max_entries,
            default_ttl_seconds: self.default_ttl.as_secs(),
            metrics: self.metrics.as_ref().and_then(|m| m.snapshot()),
        }
    }
}

#[async_trait]
impl SchemaCacheStore for LocalCache {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        let started = Instant::now();
        let found = self.get_entry(key).await.map(|entry| entry.value.clone());

        if let Some(metrics) = &self.metrics {
            match found {
                Some(_) => metrics.record_hit(started.elapsed()),
                None => metrics.record_miss(started.elapsed()),
            }
        }
        tracing::debug!(key, hit = found.is_some(), "local cache lookup");
        found
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        source_file: Option<&Path>,
    ) -> CacheResult<()> {
        let source = match source_file {
            Some(path) => SourceFingerprint::capture(path).await,
            None => None,
        };
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl)).with_source(source);
        self.insert_entry(key, entry).await;
        Ok(())
    }

    async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    async fn check_staleness(&self, key: &str, source_file: &Path) -> bool {
        match self.entries.get(key).await {
            Some(entry) => entry.is_stale(source_file).await,
            None => true,
        }
    }

    async fn stats(&self) -> CacheStatsReport {
        CacheStatsReport::Local(self.local_stats().await)
    }
}
