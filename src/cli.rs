use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::CacheKind;
use crate::models::NodeKind;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

/// How command results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Indented text for terminals
    #[default]
    Human,
    /// Pretty-printed JSON
    Json,
}

/// Cache tier selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheTypeArg {
    Local,
    Distributed,
}

impl From<CacheTypeArg> for CacheKind {
    fn from(arg: CacheTypeArg) -> Self {
        match arg {
            CacheTypeArg::Local => CacheKind::Local,
            CacheTypeArg::Distributed => CacheKind::Distributed,
        }
    }
}

/// HPXML schema explorer
#[derive(Parser, Debug, Clone)]
#[command(name = "hpxml-schema")]
#[command(about = "Parse HPXML schemas into cached rule trees and query them")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding versioned schemas
    #[arg(long = "schema-dir", global = true)]
    pub schema_dir: Option<PathBuf>,

    /// Single schema file, bypasses version discovery
    #[arg(long = "schema-path", global = true)]
    pub schema_path: Option<PathBuf>,

    /// Schema version to query ("latest" and "default" are accepted)
    #[arg(short = 's', long = "schema-version", global = true)]
    pub schema_version: Option<String>,

    /// Root element the tree is built from
    #[arg(long = "root", global = true)]
    pub root: Option<String>,

    /// Parser options as key=value pairs separated by commas
    #[arg(long = "parser-config", global = true)]
    pub parser_config: Option<String>,

    /// Cache tier to use
    #[arg(long = "cache-type", value_enum, global = true)]
    pub cache_type: Option<CacheTypeArg>,

    /// Cache TTL in seconds
    #[arg(long = "cache-ttl", global = true)]
    pub cache_ttl: Option<u64>,

    /// Output format
    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Human,
        global = true
    )]
    pub output_format: OutputFormat,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        conflicts_with = "verbose",
        global = true
    )]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List discovered schema versions
    Versions,

    /// Print the rule tree, optionally starting at a section
    Tree {
        /// Xpath of the section to print
        #[arg(long)]
        section: Option<String>,

        /// Number of levels to expand
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },

    /// List the direct fields of a section
    Fields {
        /// Xpath of the section (defaults to the root)
        #[arg(long)]
        section: Option<String>,
    },

    /// Search node names and xpaths
    Search {
        query: String,

        /// Restrict results to sections or fields
        #[arg(long)]
        kind: Option<NodeKind>,

        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Check a value against a field's constraints
    ValidateField {
        xpath: String,
        value: Option<String>,
    },

    /// Show cache statistics
    Stats,

    /// Drop cached trees and memoized parsers
    ClearCache,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default tracing filter when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        match self.verbosity() {
            VerbosityLevel::Quiet => "hpxml_schema=error",
            VerbosityLevel::Normal => "hpxml_schema=warn",
            VerbosityLevel::Verbose => "hpxml_schema=debug",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.schema_path
            && !path.exists()
        {
            return Err(format!("Schema file does not exist: {}", path.display()));
        }
        if let Some(dir) = &self.schema_dir
            && !dir.is_dir()
        {
            return Err(format!("Schema directory does not exist: {}", dir.display()));
        }
        if let Command::Search { limit: 0, .. } = self.command {
            return Err("Search limit must be greater than 0".to_string());
        }
        Ok(())
    }
}
