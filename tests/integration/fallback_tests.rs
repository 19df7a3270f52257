//! Callers see the same results whether or not the shared backend works

use std::sync::Arc;

use hpxml_schema::{
    CacheSettings, CacheStatsReport, CachedSchemaParser, DistributedCache, ParserConfig,
    SchemaCacheStore,
};

use crate::common::{TestFixtures, WALL, failing_backend};

#[tokio::test]
async fn test_failing_backend_is_transparent_to_parsing() {
    let fixtures = TestFixtures::new();
    let cache = Arc::new(DistributedCache::with_backend(
        Arc::new(failing_backend()),
        &CacheSettings::default(),
    ));
    let parser = CachedSchemaParser::new(
        cache.clone(),
        ParserConfig::default(),
        Some(fixtures.sample_xsd()),
    );

    let first = parser.parse_xsd(None, "HPXML", false).await.unwrap();
    assert!(!cache.is_available());

    let second = parser.parse_xsd(None, "HPXML", false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.find(WALL).is_some());

    let CacheStatsReport::Distributed(stats) = cache.stats().await else {
        panic!("expected distributed stats");
    };
    assert!(!stats.available);
    assert_eq!(stats.local.entries, 1);
}

#[tokio::test]
async fn test_working_and_failing_backends_agree() {
    let fixtures = TestFixtures::new();
    let settings = CacheSettings {
        force_in_memory_backend: true,
        ..CacheSettings::default()
    };

    let healthy: Arc<dyn SchemaCacheStore> = Arc::new(DistributedCache::connect(&settings).await);
    let broken: Arc<dyn SchemaCacheStore> = Arc::new(DistributedCache::with_backend(
        Arc::new(failing_backend()),
        &settings,
    ));

    let mut trees = Vec::new();
    for cache in [healthy, broken] {
        let parser = CachedSchemaParser::new(cache, ParserConfig::default(), Some(fixtures.sample_xsd()));
        let tree = parser
            .parse_combined(None, Some(&fixtures.sample_schematron()), "HPXML", false)
            .await
            .unwrap();
        let cached = parser
            .parse_combined(None, Some(&fixtures.sample_schematron()), "HPXML", false)
            .await
            .unwrap();
        assert_eq!(*tree, *cached);
        trees.push(tree);
    }

    assert_eq!(*trees[0], *trees[1]);
}
