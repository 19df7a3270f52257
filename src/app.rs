//! Explicitly constructed application state shared by every command

use std::sync::Arc;

use crate::cache::{LocalCache, SchemaCacheStore};
use crate::cached_parser::CachedSchemaParser;
use crate::config::{CacheKind, Config};
use crate::distributed_cache::DistributedCache;
use crate::error::{Result, VersionError};
use crate::models::RuleNode;
use crate::versions::{LocalSchemaAcquirer, SchemaAcquirer, VersionRegistry};

/// Owns the cache, the version registry and the resolved configuration.
pub struct AppContext {
    config: Config,
    cache: Arc<dyn SchemaCacheStore>,
    registry: VersionRegistry,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Self {
        let acquirer: Arc<dyn SchemaAcquirer> = Arc::new(LocalSchemaAcquirer::default());
        Self::with_acquirer(config, Some(acquirer)).await
    }

    pub async fn with_acquirer(config: Config, acquirer: Option<Arc<dyn SchemaAcquirer>>) -> Self {
        let cache: Arc<dyn SchemaCacheStore> = match config.cache.kind {
            CacheKind::Local => Arc::new(LocalCache::from_settings(&config.cache)),
            CacheKind::Distributed => Arc::new(DistributedCache::connect(&config.cache).await),
        };
        tracing::info!(cache = cache.name(), "schema cache ready");

        let registry =
            VersionRegistry::discover(&config.schema, Arc::clone(&cache), acquirer).await;

        Self {
            config,
            cache,
            registry,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn SchemaCacheStore> {
        &self.cache
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    /// Parser for a requested version or alias, using the configured options.
    pub fn parser(&self, version: Option<&str>) -> Result<(String, Arc<CachedSchemaParser>)> {
        let version = self.registry.resolve(version)?;
        let parser = self
            .registry
            .get_parser(&version, Some(&self.config.parser))
            .ok_or_else(|| VersionError::UnknownVersion {
                version: version.clone(),
                available: self.registry.available_versions(),
            })?;
        Ok((version, parser))
    }

    /// Tree rooted at the configured root element.
    pub async fn load_tree(&self, version: Option<&str>) -> Result<(String, Arc<RuleNode>)> {
        let (version, parser) = self.parser(version)?;
        let tree = parser
            .parse_xsd(None, &self.config.schema.root_element, false)
            .await?;
        Ok((version, tree))
    }

    /// Drop cached entries and memoized parsers.
    pub async fn reset(&self) {
        self.cache.clear().await;
        self.registry.clear_parser_cache(None);
    }
}
