//! # hpxml-schema Library
//!
//! Turns HPXML XSD schemas into normalized rule trees, attaches Schematron
//! business rules, and caches the results locally or in a shared backend
//! with transparent fallback. Schema versions are discovered on disk and
//! resolved through a registry.

pub mod app;
pub mod backend;
pub mod cache;
pub mod cached_parser;
pub mod cli;
pub mod codec;
pub mod config;
pub mod distributed_cache;
pub mod error;
pub mod models;
pub mod output;
pub mod schematron;
pub mod versions;
pub mod xsd_parser;

pub use app::AppContext;
pub use backend::{CacacheBackend, KvBackend, MemoryBackend, connect_backend};
pub use cache::{
    CacheEntry, CacheMetrics, CacheMetricsRecorder, CacheStatsReport, CacheValue, LocalCache,
    LocalCacheStats, MetricsSnapshot, SchemaCacheStore, SourceFingerprint,
};
pub use cached_parser::CachedSchemaParser;
pub use cli::{Cli, Command, OutputFormat, VerbosityLevel};
pub use config::{CacheKind, CacheSettings, Config, ConfigManager, ParserConfig, SchemaSettings};
pub use distributed_cache::{DistributedCache, DistributedCacheStats};
pub use error::{CacheError, Result, SchemaError, VersionError};
pub use models::{NodeKind, RuleNode, ValidationRule, ValueCheck};
pub use output::Output;
pub use schematron::{AttachReport, RuleSet, SchematronAssertion, parse_schematron};
pub use versions::{
    LocalSchemaAcquirer, SchemaAcquirer, SchemaVersion, SchemaVersionInfo, VersionRegistry,
    detect_schema_version,
};
pub use xsd_parser::{XsdParser, parse_xsd, parse_xsd_str};
