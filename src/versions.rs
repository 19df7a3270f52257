//! Schema version discovery and per-version parsers

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::cache::SchemaCacheStore;
use crate::cached_parser::CachedSchemaParser;
use crate::config::{ParserConfig, SchemaSettings};
use crate::error::{VersionError, VersionResult};
use crate::xsd_parser::{XS_NS, parse_document};

const SCHEMA_FILE: &str = "HPXML.xsd";

/// Dotted numeric release with an optional pre-release tag.
///
/// `4.0` equals `4.0.0`, and `4.1-rc1` sorts before `4.1`.
#[derive(Debug, Clone, Eq)]
pub struct SchemaVersion {
    release: Vec<u64>,
    pre: Option<String>,
}

impl SchemaVersion {
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    fn trimmed_release(&self) -> &[u64] {
        let len = self
            .release
            .iter()
            .rposition(|&n| n != 0)
            .map_or(0, |i| i + 1);
        &self.release[..len]
    }
}

impl FromStr for SchemaVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidVersion {
            version: s.to_string(),
        };
        let text = s.trim();
        let text = text.strip_prefix(['v', 'V']).unwrap_or(text);

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (release_text, rest) = text.split_at(split);
        // "4.1.rc1" leaves a trailing separator on the release part
        let release_text = if rest.is_empty() {
            release_text
        } else {
            release_text.strip_suffix('.').unwrap_or(release_text)
        };

        let release = release_text
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = rest.trim_start_matches(['-', '.', '_']);
        if !rest.is_empty() && (pre.is_empty() || !pre.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')) {
            return Err(invalid());
        }

        Ok(Self {
            release,
            pre: (!pre.is_empty()).then(|| pre.to_ascii_lowercase()),
        })
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.trimmed_release()
            .cmp(other.trimmed_release())
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// Newest first; unparseable names go last in lexical order.
fn sort_newest_first(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        match (a.parse::<SchemaVersion>(), b.parse::<SchemaVersion>()) {
            (Ok(va), Ok(vb)) => vb.cmp(&va),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVersionInfo {
    pub version: String,
    pub path: PathBuf,
    pub description: String,
    pub release_date: Option<String>,
    pub deprecated: bool,
    pub default: bool,
}

impl SchemaVersionInfo {
    pub fn new(version: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let version = version.into();
        Self {
            description: format!("HPXML Schema version {}", version),
            version,
            path: path.into(),
            release_date: None,
            deprecated: false,
            default: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }
}

/// Supplies schema files that are not present locally.
#[async_trait]
pub trait SchemaAcquirer: Send + Sync {
    async fn acquire(&self, version: &str) -> Option<PathBuf>;
}

/// Looks in the local download cache and common OpenStudio-HPXML installs.
/// Performs no network access.
#[derive(Debug, Clone)]
pub struct LocalSchemaAcquirer {
    download_dir: Option<PathBuf>,
    install_paths: Vec<PathBuf>,
}

impl Default for LocalSchemaAcquirer {
    fn default() -> Self {
        let download_dir = dirs::cache_dir().map(|d| d.join("hpxml-schema").join("schemas"));
        let mut install_paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            install_paths.push(home.join(
                ".local/share/OpenStudio-HPXML-v1.9.1/HPXMLtoOpenStudio/resources/hpxml_schema/HPXML.xsd",
            ));
        }
        install_paths.push(PathBuf::from(
            "/usr/local/openstudio/HPXMLtoOpenStudio/resources/hpxml_schema/HPXML.xsd",
        ));
        install_paths.push(PathBuf::from(
            "/opt/openstudio/HPXMLtoOpenStudio/resources/hpxml_schema/HPXML.xsd",
        ));
        Self {
            download_dir,
            install_paths,
        }
    }
}

impl LocalSchemaAcquirer {
    pub fn new(download_dir: Option<PathBuf>, install_paths: Vec<PathBuf>) -> Self {
        Self {
            download_dir,
            install_paths,
        }
    }
}

#[async_trait]
impl SchemaAcquirer for LocalSchemaAcquirer {
    async fn acquire(&self, version: &str) -> Option<PathBuf> {
        if let Some(dir) = &self.download_dir {
            let candidate = dir.join(format!("HPXML_{}.xsd", version));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        self.install_paths
            .iter()
            .find(|p| p.is_file() && detect_schema_version(p) == version)
            .cloned()
    }
}

/// Best-effort version of a schema file: the root `version` attribute, then
/// annotation text, then the path itself. Defaults to "4.0".
pub fn detect_schema_version(path: &Path) -> String {
    if let Ok(text) = std::fs::read_to_string(path)
        && let Ok(doc) = parse_document(&text, &path.to_string_lossy())
    {
        let root = doc.root_element();
        if let Some(version) = root.attribute("version").filter(|v| !v.is_empty()) {
            return version.to_string();
        }
        let docs = root.descendants().filter(|n| {
            n.is_element()
                && n.tag_name().namespace() == Some(XS_NS)
                && n.tag_name().name() == "documentation"
                && n.ancestors().any(|a| a.tag_name().name() == "annotation")
        });
        for doc_node in docs {
            let text: String = doc_node.descendants().filter_map(|n| n.text()).collect();
            if text.contains("4.1") {
                return "4.1".to_string();
            }
            if text.contains("4.0") {
                return "4.0".to_string();
            }
        }
    }

    let path_text = path.to_string_lossy();
    if path_text.contains("4.1") {
        "4.1".to_string()
    } else {
        "4.0".to_string()
    }
}

/// Catalog of installed schema versions and their memoized parsers.
pub struct VersionRegistry {
    versions: RwLock<BTreeMap<String, SchemaVersionInfo>>,
    parsers: Mutex<HashMap<String, Arc<CachedSchemaParser>>>,
    cache: Arc<dyn SchemaCacheStore>,
    acquirer: Option<Arc<dyn SchemaAcquirer>>,
}

impl VersionRegistry {
    pub fn new(
        versions: impl IntoIterator<Item = SchemaVersionInfo>,
        cache: Arc<dyn SchemaCacheStore>,
    ) -> Self {
        Self {
            versions: RwLock::new(
                versions
                    .into_iter()
                    .map(|info| (info.version.clone(), info))
                    .collect(),
            ),
            parsers: Mutex::new(HashMap::new()),
            cache,
            acquirer: None,
        }
    }

    pub fn with_acquirer(mut self, acquirer: Arc<dyn SchemaAcquirer>) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    /// Build the catalog from local files, asking `acquirer` only when
    /// nothing is installed.
    pub async fn discover(
        settings: &SchemaSettings,
        cache: Arc<dyn SchemaCacheStore>,
        acquirer: Option<Arc<dyn SchemaAcquirer>>,
    ) -> Self {
        let mut found = discover_local(settings);

        if found.is_empty()
            && let Some(acquirer) = &acquirer
            && let Some(path) = acquirer.acquire(&settings.default_version).await
        {
            tracing::info!(path = %path.display(), "schema supplied by acquirer");
            found.push(
                SchemaVersionInfo::new(settings.default_version.clone(), path)
                    .with_description(format!(
                        "HPXML Schema v{} (acquired)",
                        settings.default_version
                    ))
                    .with_default(true),
            );
        }

        tracing::info!(
            versions = ?found.iter().map(|v| v.version.as_str()).collect::<Vec<_>>(),
            "discovered schema versions"
        );

        let registry = Self::new(found, cache);
        match acquirer {
            Some(acquirer) => registry.with_acquirer(acquirer),
            None => registry,
        }
    }

    pub fn available_versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.versions.read().keys().cloned().collect();
        sort_newest_first(&mut versions);
        versions
    }

    pub fn default_version(&self) -> Option<String> {
        let flagged = self
            .versions
            .read()
            .values()
            .find(|info| info.default)
            .map(|info| info.version.clone());
        flagged.or_else(|| self.available_versions().into_iter().next())
    }

    pub fn version_info(&self, version: &str) -> Option<SchemaVersionInfo> {
        self.versions.read().get(version).cloned()
    }

    pub fn is_version_available(&self, version: &str) -> bool {
        self.versions.read().contains_key(version)
    }

    /// Parser for `version`, shared by every caller using the same config.
    pub fn get_parser(
        &self,
        version: &str,
        config: Option<&ParserConfig>,
    ) -> Option<Arc<CachedSchemaParser>> {
        let info = self.version_info(version)?;
        let config = config.cloned().unwrap_or_default();
        let memo_key = format!("{}:{}", version, config.fingerprint());

        let mut parsers = self.parsers.lock();
        let parser = parsers.entry(memo_key).or_insert_with(|| {
            Arc::new(CachedSchemaParser::new(
                Arc::clone(&self.cache),
                config,
                Some(info.path),
            ))
        });
        Some(Arc::clone(parser))
    }

    pub async fn ensure_version_available(&self, version: &str) -> bool {
        if self.is_version_available(version) {
            return true;
        }
        let Some(acquirer) = &self.acquirer else {
            return false;
        };
        match acquirer.acquire(version).await {
            Some(path) => {
                tracing::info!(version, path = %path.display(), "schema version acquired");
                self.versions.write().insert(
                    version.to_string(),
                    SchemaVersionInfo::new(version, path)
                        .with_description(format!("HPXML Schema v{} (acquired)", version)),
                );
                true
            }
            None => false,
        }
    }

    pub fn validate_version(&self, version: &str) -> bool {
        !version.is_empty()
            && self.is_version_available(version)
            && version.parse::<SchemaVersion>().is_ok()
    }

    /// Available versions at or above `min_version`, oldest first.
    pub fn compatible_versions(&self, min_version: &str) -> Vec<String> {
        let Ok(min) = min_version.parse::<SchemaVersion>() else {
            return Vec::new();
        };
        let mut compatible: Vec<(SchemaVersion, String)> = self
            .versions
            .read()
            .keys()
            .filter_map(|v| v.parse::<SchemaVersion>().ok().map(|parsed| (parsed, v.clone())))
            .filter(|(parsed, _)| *parsed >= min)
            .collect();
        compatible.sort_by(|a, b| a.0.cmp(&b.0));
        compatible.into_iter().map(|(_, v)| v).collect()
    }

    pub fn clear_parser_cache(&self, version: Option<&str>) {
        let mut parsers = self.parsers.lock();
        match version {
            Some(version) => {
                let prefix = format!("{}:", version);
                parsers.retain(|key, _| !key.starts_with(&prefix));
            }
            None => parsers.clear(),
        }
    }

    pub fn parser_count(&self) -> usize {
        self.parsers.lock().len()
    }

    /// Resolve an optional version or alias (`default`, `latest`).
    pub fn resolve(&self, requested: Option<&str>) -> VersionResult<String> {
        match requested.map(str::trim) {
            None | Some("") | Some("default") => {
                self.default_version().ok_or(VersionError::NoVersionsAvailable)
            }
            Some("latest") => self
                .available_versions()
                .into_iter()
                .next()
                .ok_or(VersionError::NoVersionsAvailable),
            Some(version) if self.is_version_available(version) => Ok(version.to_string()),
            Some(version) => {
                version.parse::<SchemaVersion>()?;
                Err(VersionError::UnknownVersion {
                    version: version.to_string(),
                    available: self.available_versions(),
                })
            }
        }
    }
}

fn discover_local(settings: &SchemaSettings) -> Vec<SchemaVersionInfo> {
    if let Some(path) = &settings.schema_path {
        if path.is_file() {
            let version = detect_schema_version(path);
            return vec![
                SchemaVersionInfo::new(version.clone(), path.clone())
                    .with_description(format!("HPXML Schema v{} (explicit path)", version))
                    .with_default(true),
            ];
        }
        tracing::warn!(path = %path.display(), "configured schema path does not exist");
    }

    let Some(dir) = schema_directory(settings) else {
        return Vec::new();
    };
    scan_directory(&dir, &settings.default_version)
}

fn schema_directory(settings: &SchemaSettings) -> Option<PathBuf> {
    if let Some(dir) = &settings.schema_dir {
        if dir.is_dir() {
            return Some(dir.clone());
        }
        tracing::warn!(dir = %dir.display(), "configured schema directory does not exist");
    }

    let mut candidates = vec![PathBuf::from("schemas"), PathBuf::from("hpxml_schemas")];
    if let Some(data_dir) = dirs::data_dir() {
        candidates.push(data_dir.join("hpxml-schemas"));
    }
    candidates
        .into_iter()
        .find(|dir| dir.is_dir() && has_versioned_schemas(dir))
}

fn has_versioned_schemas(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        (path.is_dir() && path.join(SCHEMA_FILE).is_file()) || flat_file_version(&path).is_some()
    })
}

/// `HPXML-<version>.xsd` file name to version.
fn flat_file_version(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let version = name.strip_prefix("HPXML-")?.strip_suffix(".xsd")?;
    (!version.is_empty() && path.is_file()).then(|| version.to_string())
}

fn scan_directory(dir: &Path, default_version: &str) -> Vec<SchemaVersionInfo> {
    let mut found: BTreeMap<String, SchemaVersionInfo> = BTreeMap::new();
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read schema directory");
            return Vec::new();
        }
    };
    entries.sort();

    for path in entries {
        let discovered = if path.is_dir() && path.join(SCHEMA_FILE).is_file() {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|version| (version.to_string(), path.join(SCHEMA_FILE)))
        } else {
            flat_file_version(&path).map(|version| (version, path.clone()))
        };

        let Some((version, schema)) = discovered else {
            continue;
        };
        if version.parse::<SchemaVersion>().is_err() {
            tracing::warn!(version, path = %schema.display(), "unparseable schema version name");
        }
        found.entry(version.clone()).or_insert_with(|| {
            SchemaVersionInfo::new(version.clone(), schema).with_default(version == default_version)
        });
    }

    if found.is_empty() {
        let single = dir.join(SCHEMA_FILE);
        if single.is_file() {
            found.insert(
                default_version.to_string(),
                SchemaVersionInfo::new(default_version, single)
                    .with_description(format!(
                        "HPXML Schema (assumed version {})",
                        default_version
                    ))
                    .with_default(true),
            );
        }
    }

    found.into_values().collect()
}
