//! Registry → parser → tree queries, the path a transport layer takes

use std::sync::Arc;

use hpxml_schema::config::SchemaSettings;
use hpxml_schema::{AppContext, CacheKind, Config, NodeKind, VersionError};

use crate::common::{WALL, versioned_schema_dir};

fn config_for(dir: &std::path::Path, kind: CacheKind) -> Config {
    let mut config = Config {
        schema: SchemaSettings {
            schema_dir: Some(dir.to_path_buf()),
            ..SchemaSettings::default()
        },
        ..Config::default()
    };
    config.cache.kind = kind;
    config.cache.force_in_memory_backend = true;
    config
}

#[tokio::test]
async fn test_root_section_field_walkthrough() {
    let dir = versioned_schema_dir(&["4.0", "4.1"]);
    let app = AppContext::with_acquirer(config_for(dir.path(), CacheKind::Local), None).await;

    let (version, tree) = app.load_tree(Some("4.0")).await.unwrap();
    assert_eq!(version, "4.0");
    assert_eq!(tree.kind, NodeKind::Section);

    let building = tree.find("/HPXML/Building").unwrap();
    assert_eq!(building.kind, NodeKind::Section);

    let wall = tree.find(WALL).unwrap();
    let adjacent = wall
        .field_children()
        .into_iter()
        .find(|f| f.name == "ExteriorAdjacentTo")
        .unwrap();
    assert_eq!(adjacent.kind, NodeKind::Field);
    assert!(adjacent.check_value(Some("garage")).valid);
    assert!(!adjacent.check_value(Some("crawlspace")).valid);

    let matches = tree.search("Insulation", None, 10);
    assert!(matches.iter().any(|n| n.xpath == format!("{}/Insulation", WALL)));
}

#[tokio::test]
async fn test_versions_resolve_to_their_own_parsers() {
    let dir = versioned_schema_dir(&["4.0", "4.1"]);
    let app = AppContext::with_acquirer(config_for(dir.path(), CacheKind::Local), None).await;

    let (latest, _) = app.parser(Some("latest")).unwrap();
    let (default, _) = app.parser(None).unwrap();
    assert_eq!(latest, "4.1");
    assert_eq!(default, "4.0");

    let (_, a) = app.parser(Some("4.1")).unwrap();
    let (_, b) = app.parser(Some("latest")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    match app.parser(Some("5.0")) {
        Err(hpxml_schema::SchemaError::Version(VersionError::UnknownVersion { available, .. })) => {
            assert_eq!(available, vec!["4.1", "4.0"]);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("5.0 should not resolve"),
    }
    assert!(app.parser(Some("not-a-version")).unwrap_err().is_bad_request());
}

#[tokio::test]
async fn test_distributed_tier_serves_identical_trees() {
    let dir = versioned_schema_dir(&["4.0"]);
    let local = AppContext::with_acquirer(config_for(dir.path(), CacheKind::Local), None).await;
    let distributed =
        AppContext::with_acquirer(config_for(dir.path(), CacheKind::Distributed), None).await;

    let (_, from_local) = local.load_tree(None).await.unwrap();
    let (_, first) = distributed.load_tree(None).await.unwrap();
    let (_, second) = distributed.load_tree(None).await.unwrap();

    assert_eq!(*from_local, *first);
    assert_eq!(*first, *second);
}

#[tokio::test]
async fn test_parser_options_change_the_tree() {
    let dir = versioned_schema_dir(&["4.0"]);
    let mut config = config_for(dir.path(), CacheKind::Local);
    config.parser.max_extension_depth = 6;
    let app = AppContext::with_acquirer(config, None).await;

    let (_, tree) = app.load_tree(None).await.unwrap();
    let assembly = tree
        .find("/HPXML/Building/BuildingDetails/Enclosure/Roofs/Roof/Assembly")
        .unwrap();
    assert!(!assembly.has_note("extension_chain_truncated"));
    assert_eq!(assembly.children.len(), 2);
}
