use crate::cli::Cli;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown parser option '{key}' (expected one of: {})", ParserConfig::OPTION_KEYS.join(", "))]
    UnknownParserOption { key: String },

    #[error("Invalid value for parser option '{key}': {value} - {reason}")]
    InvalidParserOption {
        key: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub parser: ParserConfig,
    pub cache: CacheSettings,
    pub schema: SchemaSettings,
}

/// Limits and switches for the XSD tree builder.
///
/// Two configurations are distinct cache dimensions whenever their serialized
/// forms differ, see [`ParserConfig::fingerprint`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct ParserConfig {
    /// Cumulative inheritance-chain length allowed before a type is truncated
    pub max_extension_depth: usize,
    /// Hard ceiling on structural descent
    pub max_recursion_depth: usize,
    /// Annotate nodes with inheritance notes and apply extension truncation
    pub track_extension_metadata: bool,
    /// Expand references to the generic `extension` element
    pub resolve_extension_refs: bool,
    /// Memoize resolved element references per parser instance
    pub cache_resolved_refs: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_extension_depth: 3,
            max_recursion_depth: 10,
            track_extension_metadata: true,
            resolve_extension_refs: false,
            cache_resolved_refs: true,
        }
    }
}

impl ParserConfig {
    pub const OPTION_KEYS: [&'static str; 5] = [
        "max_extension_depth",
        "max_recursion_depth",
        "track_extension_metadata",
        "resolve_extension_refs",
        "cache_resolved_refs",
    ];

    /// Build a configuration from a `key=value,key=value` option string,
    /// starting from the defaults.
    pub fn from_options_str(options: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_options_str(options)?;
        Ok(config)
    }

    /// Apply a `key=value,...` option string on top of the current values.
    pub fn apply_options_str(&mut self, options: &str) -> Result<()> {
        for pair in options.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::InvalidParserOption {
                    key: pair.to_string(),
                    value: String::new(),
                    reason: "expected key=value".to_string(),
                }
            })?;
            self.set_option(key.trim(), value.trim())?;
        }
        Ok(())
    }

    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "max_extension_depth" => self.max_extension_depth = parse_count(key, value)?,
            "max_recursion_depth" => self.max_recursion_depth = parse_count(key, value)?,
            "track_extension_metadata" => self.track_extension_metadata = parse_flag(key, value)?,
            "resolve_extension_refs" => self.resolve_extension_refs = parse_flag(key, value)?,
            "cache_resolved_refs" => self.cache_resolved_refs = parse_flag(key, value)?,
            _ => {
                return Err(ConfigError::UnknownParserOption {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Stable serialized form used in cache keys and parser memo keys.
    pub fn fingerprint(&self) -> String {
        format!(
            "max_extension_depth={},max_recursion_depth={},track_extension_metadata={},resolve_extension_refs={},cache_resolved_refs={}",
            self.max_extension_depth,
            self.max_recursion_depth,
            self.track_extension_metadata,
            self.resolve_extension_refs,
            self.cache_resolved_refs
        )
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| ConfigError::InvalidParserOption {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidParserOption {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Which cache tier the application wires in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Local,
    Distributed,
}

impl std::str::FromStr for CacheKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(CacheKind::Local),
            "distributed" => Ok(CacheKind::Distributed),
            other => Err(ConfigError::Validation(format!(
                "Unknown cache type: {}",
                other
            ))),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub kind: CacheKind,
    /// Default entry time-to-live in seconds
    pub default_ttl_seconds: u64,
    /// Maximum number of entries held by the in-process cache
    pub max_entries: u64,
    /// Shared backend location, e.g. `cacache:///var/cache/hpxml`
    pub backend_url: Option<String>,
    /// Namespace prepended to every backend key
    pub key_prefix: String,
    /// Use the in-process substitute backend regardless of `backend_url`
    pub force_in_memory_backend: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            kind: CacheKind::Local,
            default_ttl_seconds: 3600,
            max_entries: 1000,
            backend_url: None,
            key_prefix: "hpxml:".to_string(),
            force_in_memory_backend: false,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

/// Schema discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaSettings {
    /// Directory holding versioned schemas
    pub schema_dir: Option<PathBuf>,
    /// Explicit single schema file, bypasses directory discovery
    pub schema_path: Option<PathBuf>,
    /// Version assigned to an unversioned `HPXML.xsd` and flagged as default
    pub default_version: String,
    /// Root element the tree is built from
    pub root_element: String,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            schema_dir: None,
            schema_path: None,
            default_version: "4.0".to_string(),
            root_element: "HPXML".to_string(),
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = if let Some(config_path) = &cli.config {
            Self::load_from_file(config_path).await?
        } else {
            Self::find_config_file().await?.unwrap_or_default()
        };

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli)?;

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "hpxml-schema.toml",
            "hpxml-schema.json",
            ".hpxml-schema.toml",
            ".hpxml-schema.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration file");
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("hpxml-schema");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    tracing::debug!(path = %path.display(), "loading configuration file");
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Schema discovery
        if let Some(dir) = env.get("HPXML_SCHEMA_DIR") {
            config.schema.schema_dir = Some(PathBuf::from(dir));
        }

        if let Some(path) = env.get("HPXML_SCHEMA_PATH") {
            config.schema.schema_path = Some(PathBuf::from(path));
        }

        if let Some(version) = env.get("HPXML_SCHEMA_VERSION") {
            config.schema.default_version = version;
        }

        // Cache settings
        if let Some(kind) = env.get("HPXML_CACHE_TYPE") {
            config.cache.kind = kind.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid HPXML_CACHE_TYPE value: {}", kind))
            })?;
        }

        if let Some(ttl) = env.get("HPXML_CACHE_TTL") {
            config.cache.default_ttl_seconds = ttl.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid HPXML_CACHE_TTL value: {}", ttl))
            })?;
        }

        if let Some(max_entries) = env.get("HPXML_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = max_entries.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid HPXML_CACHE_MAX_ENTRIES value: {}",
                    max_entries
                ))
            })?;
        }

        if let Some(url) = env.get("HPXML_CACHE_BACKEND_URL") {
            config.cache.backend_url = Some(url);
        }

        if let Some(prefix) = env.get("HPXML_CACHE_PREFIX") {
            config.cache.key_prefix = prefix;
        }

        if let Some(force) = env.get("HPXML_FORCE_IN_MEMORY_BACKEND") {
            config.cache.force_in_memory_backend = matches!(force.as_str(), "1" | "true");
        }

        // Parser options
        if let Some(options) = env.get("HPXML_PARSER_CONFIG") {
            config.parser.apply_options_str(&options)?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Result<Config> {
        if let Some(dir) = &cli.schema_dir {
            config.schema.schema_dir = Some(dir.clone());
        }

        if let Some(path) = &cli.schema_path {
            config.schema.schema_path = Some(path.clone());
        }

        if let Some(root) = &cli.root {
            config.schema.root_element = root.clone();
        }

        if let Some(kind) = cli.cache_type {
            config.cache.kind = kind.into();
        }

        if let Some(ttl) = cli.cache_ttl {
            config.cache.default_ttl_seconds = ttl;
        }

        if let Some(options) = &cli.parser_config {
            config.parser.apply_options_str(options)?;
        }

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.parser.max_recursion_depth == 0 {
            return Err(ConfigError::Validation(
                "max_recursion_depth must be greater than 0".to_string(),
            ));
        }

        if config.cache.default_ttl_seconds == 0 {
            return Err(ConfigError::Validation(
                "Cache TTL must be greater than 0".to_string(),
            ));
        }

        if config.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Cache capacity must be greater than 0".to_string(),
            ));
        }

        if config.cache.key_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "Cache key prefix cannot be empty".to_string(),
            ));
        }

        if config.schema.root_element.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Root element name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
