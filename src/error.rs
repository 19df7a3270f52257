use std::path::PathBuf;

use thiserror::Error;

/// Main error type for schema ingestion, caching and version resolution.
///
/// Only structural failures end up here. Cycles, depth overruns and unresolved
/// references inside a schema are recorded as annotated placeholder nodes in
/// the tree instead.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parsing error in {source_name}: {details}")]
    XmlParse {
        source_name: String,
        details: String,
    },

    #[error("Root element not found: '{root}' in {source_name}")]
    RootElementNotFound { root: String, source_name: String },

    #[error("No schema path provided and no default schema path set")]
    MissingSchemaPath,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("Background task failed: {0}")]
    TaskJoin(String),
}

impl SchemaError {
    /// True for errors a transport layer should report as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchemaError::RootElementNotFound { .. }
                | SchemaError::Version(VersionError::NoVersionsAvailable)
                | SchemaError::Version(VersionError::UnknownVersion { .. })
        )
    }

    /// True for errors caused by invalid caller input.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            SchemaError::Version(VersionError::InvalidVersion { .. }) | SchemaError::Config(_)
        )
    }
}

/// Cache-specific error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error ({backend}): {details}")]
    Backend { backend: String, details: String },

    #[error("Unsupported cache backend URL: {url}")]
    UnsupportedBackend { url: String },

    #[error("Serialization failed for {key}: {details}")]
    Serialization { key: String, details: String },

    #[error("Cache frame could not be decoded: {details}")]
    Codec { details: String },

    #[error("Cache IO error: {path} - {details}")]
    Io { path: PathBuf, details: String },
}

/// Version resolution error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("No schema versions are available")]
    NoVersionsAvailable,

    #[error("Schema version '{version}' is not available (available: {})", available.join(", "))]
    UnknownVersion {
        version: String,
        available: Vec<String>,
    },

    #[error("Invalid version string: '{version}'")]
    InvalidVersion { version: String },
}

impl From<crate::config::ConfigError> for SchemaError {
    fn from(err: crate::config::ConfigError) -> Self {
        SchemaError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SchemaError {
    fn from(err: tokio::task::JoinError) -> Self {
        SchemaError::TaskJoin(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Version result type alias
pub type VersionResult<T> = std::result::Result<T, VersionError>;
