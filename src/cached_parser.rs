use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::cache::{CacheValue, SchemaCacheStore};
use crate::config::ParserConfig;
use crate::error::{Result, SchemaError};
use crate::models::RuleNode;
use crate::schematron::{RuleSet, parse_schematron};
use crate::xsd_parser::parse_xsd;

/// Parser front end that memoizes trees and rule sets in a schema cache.
///
/// Concurrent misses for the same key may each parse; the last write wins.
#[derive(Clone)]
pub struct CachedSchemaParser {
    cache: Arc<dyn SchemaCacheStore>,
    config: ParserConfig,
    schema_path: Option<PathBuf>,
}

impl std::fmt::Debug for CachedSchemaParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSchemaParser")
            .field("config", &self.config)
            .field("schema_path", &self.schema_path)
            .finish_non_exhaustive()
    }
}

impl CachedSchemaParser {
    pub fn new(
        cache: Arc<dyn SchemaCacheStore>,
        config: ParserConfig,
        schema_path: Option<PathBuf>,
    ) -> Self {
        Self {
            cache,
            config,
            schema_path,
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn schema_path(&self) -> Option<&Path> {
        self.schema_path.as_deref()
    }

    pub fn cache(&self) -> &Arc<dyn SchemaCacheStore> {
        &self.cache
    }

    /// SHA-256 over the operation, its inputs and the parser configuration.
    fn cache_key(&self, operation: &str, parts: &[&str]) -> String {
        let config = serde_json::to_string(&self.config).unwrap_or_else(|_| self.config.fingerprint());
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        for part in parts {
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(config.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn resolve_path(&self, path: Option<&Path>) -> Result<PathBuf> {
        path.or(self.schema_path.as_deref())
            .map(Path::to_path_buf)
            .ok_or(SchemaError::MissingSchemaPath)
    }

    async fn store(&self, key: &str, value: CacheValue, source: &Path) {
        if let Err(e) = self.cache.set(key, value, None, Some(source)).await {
            tracing::warn!(key, error = %e, "could not cache parse result");
        }
    }

    /// Parse `path` (or the default schema) into a tree rooted at `root`.
    pub async fn parse_xsd(
        &self,
        path: Option<&Path>,
        root: &str,
        force_refresh: bool,
    ) -> Result<Arc<RuleNode>> {
        let path = self.resolve_path(path)?;
        let key = self.cache_key("parse_xsd", &[&path.to_string_lossy(), root]);

        if !force_refresh
            && !self.cache.check_staleness(&key, &path).await
            && let Some(tree) = self.cache.get(&key).await.and_then(|v| v.as_tree())
        {
            tracing::debug!(path = %path.display(), root, "schema tree served from cache");
            return Ok(tree);
        }

        let tree = {
            let path = path.clone();
            let root = root.to_string();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || parse_xsd(&path, &root, &config)).await??
        };
        let tree = Arc::new(tree);
        self.store(&key, CacheValue::Tree(Arc::clone(&tree)), &path)
            .await;
        Ok(tree)
    }

    pub async fn parse_schematron(&self, path: &Path, force_refresh: bool) -> Result<Arc<RuleSet>> {
        let key = self.cache_key("parse_schematron", &[&path.to_string_lossy()]);

        if !force_refresh
            && !self.cache.check_staleness(&key, path).await
            && let Some(rules) = self.cache.get(&key).await.and_then(|v| v.as_rules())
        {
            tracing::debug!(path = %path.display(), "schematron rules served from cache");
            return Ok(rules);
        }

        let rules = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || parse_schematron(&path)).await??
        };
        let rules = Arc::new(rules);
        self.store(&key, CacheValue::Rules(Arc::clone(&rules)), path)
            .await;
        Ok(rules)
    }

    /// XSD tree with Schematron rules attached.
    ///
    /// The merged tree is recorded against the XSD. When rules are attached,
    /// a companion record under `{key}:sch` tracks the Schematron file, so an
    /// edit to either source invalidates the merged tree.
    pub async fn parse_combined(
        &self,
        xsd_path: Option<&Path>,
        schematron_path: Option<&Path>,
        root: &str,
        force_refresh: bool,
    ) -> Result<Arc<RuleNode>> {
        let xsd_path = self.resolve_path(xsd_path)?;
        let sch = schematron_path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = self.cache_key("parse_combined", &[&xsd_path.to_string_lossy(), &sch, root]);
        let rules_key = format!("{}:sch", key);

        if !force_refresh
            && !self.combined_is_stale(&key, &rules_key, &xsd_path, schematron_path).await
            && let Some(tree) = self.cache.get(&key).await.and_then(|v| v.as_tree())
        {
            return Ok(tree);
        }

        let base = self.parse_xsd(Some(&xsd_path), root, force_refresh).await?;
        let mut combined = (*base).clone();

        if let Some(sch_path) = schematron_path {
            let rules = self.parse_schematron(sch_path, force_refresh).await?;
            rules.attach_to_tree(&mut combined);
            self.store(&rules_key, CacheValue::Rules(rules), sch_path)
                .await;
        }

        let combined = Arc::new(combined);
        self.store(&key, CacheValue::Tree(Arc::clone(&combined)), &xsd_path)
            .await;
        Ok(combined)
    }

    async fn combined_is_stale(
        &self,
        key: &str,
        rules_key: &str,
        xsd_path: &Path,
        sch_path: Option<&Path>,
    ) -> bool {
        if self.cache.check_staleness(key, xsd_path).await {
            return true;
        }
        match sch_path {
            Some(path) => self.cache.check_staleness(rules_key, path).await,
            None => false,
        }
    }

    pub async fn invalidate_all(&self) {
        self.cache.clear().await;
    }
}
