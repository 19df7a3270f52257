//! Tree building against the sample HPXML schema

use hpxml_schema::xsd_parser::DEPTH_LIMIT_NAME;
use hpxml_schema::{NodeKind, ParserConfig, SchemaError, parse_xsd};

use crate::common::{ROOF, TestFixtures, WALL, WINDOW};

fn sample_tree(config: &ParserConfig) -> hpxml_schema::RuleNode {
    parse_xsd(&TestFixtures::new().sample_xsd(), "HPXML", config).unwrap()
}

#[test]
fn test_root_and_top_level_sections() {
    let tree = sample_tree(&ParserConfig::default());

    assert_eq!(tree.xpath, "/HPXML");
    assert_eq!(tree.kind, NodeKind::Section);
    assert_eq!(
        tree.description.as_deref(),
        Some("Root element of an HPXML document")
    );

    let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["XMLTransactionHeaderInformation", "SoftwareInfo", "Building"]
    );

    let building = tree.find("/HPXML/Building").unwrap();
    assert!(building.repeatable);
    assert_eq!(building.max_occurs.as_deref(), Some("unbounded"));
}

#[test]
fn test_referenced_element_takes_site_occurrence() {
    let tree = sample_tree(&ParserConfig::default());
    let software = tree.find("/HPXML/SoftwareInfo").unwrap();

    assert_eq!(software.kind, NodeKind::Section);
    assert_eq!(software.min_occurs, Some(0));
    assert_eq!(software.children.len(), 2);
}

#[test]
fn test_fields_carry_types_and_enumerations() {
    let tree = sample_tree(&ParserConfig::default());

    let transaction = tree
        .find("/HPXML/XMLTransactionHeaderInformation/Transaction")
        .unwrap();
    assert!(transaction.is_field());
    assert_eq!(transaction.enum_values, vec!["create", "update"]);

    let adjacent = tree.find(&format!("{}/ExteriorAdjacentTo", WALL)).unwrap();
    assert_eq!(adjacent.data_type.as_deref(), Some("string"));
    assert_eq!(adjacent.enum_values, vec!["outside", "attic", "garage"]);
    assert_eq!(adjacent.min_occurs, Some(0));

    let roof_type = tree.find(&format!("{}/RoofType", ROOF)).unwrap();
    assert_eq!(roof_type.enum_values, vec!["hip", "gable", "flat"]);

    // simpleContent wrappers resolve to the value type they carry
    let area = tree.find(&format!("{}/Area", WINDOW)).unwrap();
    assert!(area.is_field());
    assert_eq!(area.data_type.as_deref(), Some("decimal"));

    let built = tree.find("/HPXML/Building/YearBuilt").unwrap();
    assert_eq!(built.data_type.as_deref(), Some("integer"));
}

#[test]
fn test_wall_structure() {
    let tree = sample_tree(&ParserConfig::default());
    let wall = tree.find(WALL).unwrap();

    assert!(wall.is_section());
    assert!(wall.repeatable);
    assert_eq!(wall.description.as_deref(), Some("Above-grade wall"));

    let fields: Vec<&str> = wall.field_children().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(fields, vec!["ExteriorAdjacentTo", "Area"]);

    let sections: Vec<&str> = wall
        .section_children()
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(sections, vec!["SystemIdentifier", "Insulation", "extension"]);
}

#[test]
fn test_inherited_content_comes_first() {
    let tree = sample_tree(&ParserConfig::default());
    let insulation = tree.find(&format!("{}/Insulation", WALL)).unwrap();

    let names: Vec<&str> = insulation.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Notes", "AssemblyEffectiveRValue", "InsulationGrade"]
    );

    let grade = &insulation.children[2];
    assert_eq!(grade.data_type.as_deref(), Some("integer"));
    assert_eq!(grade.enum_values, vec!["1", "2", "3"]);
}

#[test]
fn test_deep_inheritance_is_truncated() {
    let tree = sample_tree(&ParserConfig::default());
    let assembly = tree.find(&format!("{}/Assembly", ROOF)).unwrap();

    assert!(assembly.children.is_empty());
    assert!(assembly.has_note("extension_chain_truncated"));
    assert!(assembly.has_note("inherits_from_4_types"));
    assert!(assembly.has_note("base_types: Layer3, Layer2"));
    assert_eq!(
        assembly.description.as_deref(),
        Some("Complex type with 4-level inheritance (truncated at depth 3)")
    );
}

#[test]
fn test_truncation_follows_configuration() {
    let generous = ParserConfig {
        max_extension_depth: 5,
        ..ParserConfig::default()
    };
    let tree = sample_tree(&generous);
    let assembly = tree.find(&format!("{}/Assembly", ROOF)).unwrap();
    assert!(!assembly.has_note("extension_chain_truncated"));
    let names: Vec<&str> = assembly.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["LayerName", "RValue"]);

    let untracked = ParserConfig {
        track_extension_metadata: false,
        ..ParserConfig::default()
    };
    let tree = sample_tree(&untracked);
    let assembly = tree.find(&format!("{}/Assembly", ROOF)).unwrap();
    assert_eq!(assembly.children.len(), 2);
}

#[test]
fn test_extension_point_is_a_leaf_section() {
    let tree = sample_tree(&ParserConfig::default());
    let ext = tree.find(&format!("{}/extension", WALL)).unwrap();

    assert_eq!(ext.kind, NodeKind::Section);
    assert!(ext.children.is_empty());
    assert!(ext.has_note("extension_point"));
    assert!(ext.has_note("allows_custom_data"));
    assert_eq!(
        ext.description.as_deref(),
        Some("Extension point for custom data")
    );
}

#[test]
fn test_choice_members_are_tagged() {
    let tree = sample_tree(&ParserConfig::default());
    let hvac = tree
        .find("/HPXML/Building/BuildingDetails/Systems/HVAC")
        .unwrap();

    assert_eq!(hvac.children.len(), 2);
    assert!(hvac.children.iter().all(|c| c.has_note("choice")));
}

#[test]
fn test_recursive_type_stops_at_depth_limit() {
    let config = ParserConfig::default();
    let tree = sample_tree(&config);

    let limits: Vec<_> = tree
        .iter_nodes()
        .filter(|n| n.name == DEPTH_LIMIT_NAME)
        .collect();
    assert_eq!(limits.len(), 1);
    assert!(limits[0].has_note("max_depth_10_exceeded"));
    assert!(limits[0].xpath.ends_with("/Zone/..."));

    let shallow = ParserConfig {
        max_recursion_depth: 6,
        ..ParserConfig::default()
    };
    let tree = sample_tree(&shallow);
    assert!(
        tree.iter_nodes()
            .any(|n| n.name == DEPTH_LIMIT_NAME && n.has_note("max_depth_6_exceeded"))
    );
}

#[test]
fn test_parse_is_deterministic() {
    let config = ParserConfig::default();
    assert_eq!(sample_tree(&config), sample_tree(&config));
}

#[test]
fn test_unknown_root_and_missing_file() {
    let fixtures = TestFixtures::new();

    let err = parse_xsd(&fixtures.sample_xsd(), "Nope", &ParserConfig::default()).unwrap_err();
    assert!(matches!(err, SchemaError::RootElementNotFound { .. }));

    let err = parse_xsd(
        &fixtures.schema_dir().join("missing.xsd"),
        "HPXML",
        &ParserConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::Io(_)));
}

#[test]
fn test_any_top_level_element_can_be_the_root() {
    let tree = parse_xsd(
        &TestFixtures::new().sample_xsd(),
        "SoftwareInfo",
        &ParserConfig::default(),
    )
    .unwrap();
    assert_eq!(tree.xpath, "/SoftwareInfo");
    assert_eq!(tree.field_children().len(), 2);
}
