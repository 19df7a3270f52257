use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;

use hpxml_schema::config::EnvProvider;
use hpxml_schema::{CacheKind, Cli, Config, ConfigManager, LocalCache, VersionRegistry};

use crate::common::TestFixtures;

struct FixedEnv(HashMap<&'static str, String>);

impl EnvProvider for FixedEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

#[tokio::test]
async fn test_file_then_cli_precedence() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("hpxml-schema.toml");
    std::fs::write(
        &config_path,
        r#"
[parser]
max_recursion_depth = 4

[cache]
kind = "distributed"
default_ttl_seconds = 900
"#,
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "hpxml-schema",
        "--config",
        config_path.to_str().unwrap(),
        "--cache-type",
        "local",
        "--parser-config",
        "max_extension_depth=2",
        "stats",
    ])
    .unwrap();

    let config = ConfigManager::load_from_file(&config_path).await.unwrap();
    let config = ConfigManager::merge_with_cli(config, &cli).unwrap();

    assert_eq!(config.parser.max_recursion_depth, 4);
    assert_eq!(config.parser.max_extension_depth, 2);
    assert_eq!(config.cache.kind, CacheKind::Local);
    assert_eq!(config.cache.default_ttl_seconds, 900);
    ConfigManager::validate_config(&config).unwrap();
}

#[test]
fn test_environment_layers_under_cli() {
    let env = FixedEnv(HashMap::from([
        ("HPXML_SCHEMA_DIR", "/env/schemas".to_string()),
        ("HPXML_CACHE_TTL", "60".to_string()),
        ("HPXML_PARSER_CONFIG", "max_recursion_depth=5,cache_resolved_refs=false".to_string()),
    ]));
    let config = ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();
    assert_eq!(config.schema.schema_dir, Some(PathBuf::from("/env/schemas")));
    assert_eq!(config.cache.default_ttl_seconds, 60);
    assert_eq!(config.parser.max_recursion_depth, 5);
    assert!(!config.parser.cache_resolved_refs);

    let cli = Cli::try_parse_from(["hpxml-schema", "--schema-dir", "/cli/schemas", "versions"]).unwrap();
    let config = ConfigManager::merge_with_cli(config, &cli).unwrap();
    assert_eq!(config.schema.schema_dir, Some(PathBuf::from("/cli/schemas")));
    assert_eq!(config.cache.default_ttl_seconds, 60);
}

#[test]
fn test_bad_parser_option_from_environment() {
    let env = FixedEnv(HashMap::from([(
        "HPXML_PARSER_CONFIG",
        "max_depth=3".to_string(),
    )]));
    let err = ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap_err();
    assert!(err.to_string().contains("max_depth"));
}

#[tokio::test]
async fn test_schema_path_override_feeds_registry() {
    let env = FixedEnv(HashMap::from([(
        "HPXML_SCHEMA_PATH",
        TestFixtures::new().sample_xsd().display().to_string(),
    )]));
    let config = ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();

    let cache = Arc::new(LocalCache::new(10, Duration::from_secs(60)));
    let registry = VersionRegistry::discover(&config.schema, cache, None).await;

    // the fixture declares version="4.0" on its schema element
    assert_eq!(registry.available_versions(), vec!["4.0"]);
    let info = registry.version_info("4.0").unwrap();
    assert!(info.default);
    assert_eq!(info.path, TestFixtures::new().sample_xsd());
}
