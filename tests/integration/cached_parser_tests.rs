use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use hpxml_schema::{
    CacheStatsReport, CachedSchemaParser, LocalCache, ParserConfig, SchemaCacheStore, SchemaError,
};

use crate::common::{TestFixtures, WALL, WINDOW, copy_fixture, touch};

struct Workspace {
    _dir: TempDir,
    xsd: std::path::PathBuf,
    schematron: std::path::PathBuf,
    cache: Arc<LocalCache>,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fixtures = TestFixtures::new();
        let xsd = copy_fixture(&fixtures.sample_xsd(), dir.path());
        let schematron = copy_fixture(&fixtures.sample_schematron(), dir.path());
        Self {
            _dir: dir,
            xsd,
            schematron,
            cache: Arc::new(LocalCache::new(100, Duration::from_secs(300))),
        }
    }

    fn parser(&self, config: ParserConfig) -> CachedSchemaParser {
        CachedSchemaParser::new(self.cache.clone(), config, Some(self.xsd.clone()))
    }

    async fn entries(&self) -> u64 {
        match self.cache.stats().await {
            CacheStatsReport::Local(stats) => stats.entries,
            other => panic!("unexpected stats: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_combined_tree_carries_rules() {
    let ws = Workspace::new();
    let parser = ws.parser(ParserConfig::default());

    let tree = parser
        .parse_combined(None, Some(&ws.schematron), "HPXML", false)
        .await
        .unwrap();

    assert_eq!(tree.find(WALL).unwrap().validations.len(), 2);
    assert_eq!(tree.find(WINDOW).unwrap().validations.len(), 1);

    // the plain tree stays free of rules
    let plain = parser.parse_xsd(None, "HPXML", false).await.unwrap();
    assert!(plain.find(WALL).unwrap().validations.is_empty());

    // xsd, schematron, combined and the combined entry's rules record
    assert_eq!(ws.entries().await, 4);
}

#[tokio::test]
async fn test_schematron_edit_refreshes_combined_tree() {
    let ws = Workspace::new();
    let parser = ws.parser(ParserConfig::default());

    let first = parser
        .parse_combined(None, Some(&ws.schematron), "HPXML", false)
        .await
        .unwrap();
    let again = parser
        .parse_combined(None, Some(&ws.schematron), "HPXML", false)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let text = std::fs::read_to_string(&ws.schematron)
        .unwrap()
        .replace("Wall must have a SystemIdentifier.", "Each wall needs an id.");
    std::fs::write(&ws.schematron, text).unwrap();
    touch(&ws.schematron);

    let refreshed = parser
        .parse_combined(None, Some(&ws.schematron), "HPXML", false)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(
        refreshed.find(WALL).unwrap().validations[0].message,
        "Each wall needs an id."
    );
}

#[tokio::test]
async fn test_parsers_with_different_options_share_one_cache() {
    let ws = Workspace::new();
    let default = ws.parser(ParserConfig::default());
    let shallow = ws.parser(ParserConfig {
        max_recursion_depth: 4,
        ..ParserConfig::default()
    });

    let full = default.parse_xsd(None, "HPXML", false).await.unwrap();
    let cut = shallow.parse_xsd(None, "HPXML", false).await.unwrap();

    assert!(cut.node_count() < full.node_count());
    assert_eq!(ws.entries().await, 2);

    default.invalidate_all().await;
    assert_eq!(ws.entries().await, 0);
}

#[tokio::test]
async fn test_missing_schema_path_is_reported() {
    let cache: Arc<dyn SchemaCacheStore> = Arc::new(LocalCache::new(10, Duration::from_secs(60)));
    let parser = CachedSchemaParser::new(cache, ParserConfig::default(), None);

    let err = parser.parse_xsd(None, "HPXML", false).await.unwrap_err();
    assert!(matches!(err, SchemaError::MissingSchemaPath));
}

#[tokio::test]
async fn test_concurrent_parses_agree() {
    let ws = Workspace::new();
    let parser = Arc::new(ws.parser(ParserConfig::default()));

    let trees = futures::future::join_all((0..4).map(|_| {
        let parser = Arc::clone(&parser);
        async move { parser.parse_xsd(None, "HPXML", false).await }
    }))
    .await;

    let trees: Vec<_> = trees.into_iter().map(|t| t.unwrap()).collect();
    assert!(trees.iter().all(|t| t.node_count() == trees[0].node_count()));
    assert_eq!(ws.entries().await, 1);
}
