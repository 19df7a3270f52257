//! Rendering of command results
//!
//! Human output is indented text, colorized when stdout is a terminal. JSON
//! output is pretty-printed and never colorized.

use serde::Serialize;
use serde_json::json;

use crate::cache::{CacheStatsReport, LocalCacheStats};
use crate::cli::{OutputFormat, VerbosityLevel};
use crate::models::{RuleNode, ValueCheck};
use crate::versions::SchemaVersionInfo;

pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors && self.format == OutputFormat::Human;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn to_json(value: &impl Serialize) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
    }

    pub fn format_versions(&self, versions: &[SchemaVersionInfo]) -> String {
        if self.format == OutputFormat::Json {
            return Self::to_json(&versions);
        }
        if versions.is_empty() {
            return self.colorize("No schema versions found", "33");
        }

        let mut output = String::from("Available schema versions:\n");
        for info in versions {
            let marker = if info.default {
                self.colorize(" (default)", "32")
            } else {
                String::new()
            };
            output.push_str(&format!("  {}{}\n", self.colorize(&info.version, "1"), marker));
            if self.verbosity >= VerbosityLevel::Verbose {
                output.push_str(&format!("    path: {}\n", info.path.display()));
                output.push_str(&format!("    {}\n", info.description));
            }
        }
        output
    }

    pub fn format_tree(&self, version: &str, tree: &RuleNode) -> String {
        if self.format == OutputFormat::Json {
            return Self::to_json(&json!({ "version": version, "tree": tree }));
        }
        let mut output = String::new();
        self.write_node(&mut output, tree, 0);
        output
    }

    fn write_node(&self, output: &mut String, node: &RuleNode, indent: usize) {
        output.push_str(&"  ".repeat(indent));
        output.push_str(&self.node_line(node));
        output.push('\n');
        for child in &node.children {
            self.write_node(output, child, indent + 1);
        }
    }

    fn node_line(&self, node: &RuleNode) -> String {
        let name = if node.is_section() {
            self.colorize(&node.name, "1;34")
        } else {
            node.name.clone()
        };

        let mut line = name;
        if let Some(data_type) = &node.data_type {
            line.push_str(&format!(" : {}", data_type));
        }
        let min = node.min_occurs.map_or_else(|| "?".to_string(), |n| n.to_string());
        let max = node.max_occurs.as_deref().unwrap_or("?");
        line.push_str(&format!(" [{}..{}]", min, max));

        if !node.enum_values.is_empty() {
            line.push_str(&format!(" {{{}}}", node.enum_values.join(", ")));
        }
        if self.verbosity >= VerbosityLevel::Verbose {
            if !node.notes.is_empty() {
                line.push_str(&self.colorize(&format!(" ({})", node.notes.join("; ")), "36"));
            }
            for rule in &node.validations {
                line.push_str(&format!(
                    "\n{}",
                    self.colorize(&format!("    ! {}: {}", rule.severity, rule.message), "33")
                ));
            }
        }
        line
    }

    pub fn format_fields(&self, section: &RuleNode, fields: &[&RuleNode]) -> String {
        if self.format == OutputFormat::Json {
            return Self::to_json(&json!({ "section": section.xpath, "fields": fields }));
        }
        if fields.is_empty() {
            return format!("No fields under {}\n", section.xpath);
        }

        let mut output = format!("Fields of {}:\n", self.colorize(&section.xpath, "1"));
        for field in fields {
            output.push_str(&format!("  {}\n", self.node_line(field)));
            if self.verbosity >= VerbosityLevel::Verbose
                && let Some(description) = &field.description
            {
                output.push_str(&format!("      {}\n", description));
            }
        }
        output
    }

    pub fn format_search(&self, query: &str, matches: &[&RuleNode]) -> String {
        if self.format == OutputFormat::Json {
            let results: Vec<_> = matches
                .iter()
                .map(|node| json!({ "xpath": node.xpath, "name": node.name, "kind": node.kind }))
                .collect();
            return Self::to_json(&json!({ "query": query, "results": results }));
        }

        let mut output = format!("{} match(es) for '{}':\n", matches.len(), query);
        for node in matches {
            output.push_str(&format!("  [{}] {}\n", node.kind, node.xpath));
        }
        output
    }

    pub fn format_value_check(&self, xpath: &str, check: &ValueCheck) -> String {
        if self.format == OutputFormat::Json {
            return Self::to_json(&json!({ "xpath": xpath, "result": check }));
        }

        let mut output = if check.valid {
            format!("{}  {}\n", self.colorize("✓ VALID", "32"), xpath)
        } else {
            format!("{}  {}\n", self.colorize("✗ INVALID", "31"), xpath)
        };
        for error in &check.errors {
            output.push_str(&format!("    {}\n", error));
        }
        if self.verbosity > VerbosityLevel::Quiet {
            for warning in &check.warnings {
                output.push_str(&format!("    {} {}\n", self.colorize("warning:", "33"), warning));
            }
        }
        output
    }

    pub fn format_stats(&self, stats: &CacheStatsReport) -> String {
        if self.format == OutputFormat::Json {
            return Self::to_json(stats);
        }

        match stats {
            CacheStatsReport::Local(local) => {
                let mut output = String::from("Cache: local\n");
                output.push_str(&self.local_stats(local));
                output
            }
            CacheStatsReport::Distributed(distributed) => {
                let status = if distributed.available {
                    self.colorize("available", "32")
                } else {
                    self.colorize("unavailable (local fallback)", "33")
                };
                let mut output = String::from("Cache: distributed\n");
                output.push_str(&format!("  Backend: {} ({})\n", distributed.backend, status));
                output.push_str(&format!("  Key prefix: {}\n", distributed.prefix));
                if let Some(keys) = distributed.backend_keys {
                    output.push_str(&format!("  Backend keys: {}\n", keys));
                }
                output.push_str("  Local mirror:\n");
                output.push_str(&self.local_stats(&distributed.local));
                output
            }
        }
    }

    fn local_stats(&self, stats: &LocalCacheStats) -> String {
        let mut output = format!(
            "  Entries: {}/{}\n  Default TTL: {}s\n",
            stats.entries, stats.max_entries, stats.default_ttl_seconds
        );
        if let Some(metrics) = &stats.metrics {
            output.push_str(&format!(
                "  Hits: {} Misses: {} Hit rate: {:.1}%\n",
                metrics.hits,
                metrics.misses,
                metrics.hit_rate * 100.0
            ));
            if self.verbosity >= VerbosityLevel::Verbose {
                output.push_str(&format!(
                    "  Evictions: {}\n  Avg response: {:.3}ms\n",
                    metrics.evictions, metrics.avg_response_time_ms
                ));
            }
        }
        output
    }

    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => Self::to_json(&json!({ "message": message })),
            OutputFormat::Human => message.to_string(),
        }
    }
}
