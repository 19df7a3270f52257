use hpxml_schema::{NodeKind, ParserConfig, RuleNode, parse_schematron, parse_xsd};

use crate::common::{ROOF, TestFixtures, WALL, WINDOW};

fn combined_tree() -> RuleNode {
    let fixtures = TestFixtures::new();
    let mut tree = parse_xsd(&fixtures.sample_xsd(), "HPXML", &ParserConfig::default()).unwrap();
    parse_schematron(&fixtures.sample_schematron())
        .unwrap()
        .attach_to_tree(&mut tree);
    tree
}

#[test]
fn test_search_by_kind_and_limit() {
    let tree = combined_tree();

    let areas = tree.search("area", Some(NodeKind::Field), 100);
    let xpaths: Vec<&str> = areas.iter().map(|n| n.xpath.as_str()).collect();
    assert_eq!(
        xpaths,
        vec![format!("{}/Area", WALL), format!("{}/Area", WINDOW)]
    );

    let sections = tree.search("WALL", Some(NodeKind::Section), 2);
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].name, "Walls");
    assert_eq!(sections[1].name, "Wall");

    assert!(tree.search("no-such-node", None, 10).is_empty());
}

#[test]
fn test_limited_to_depth_prunes_copy() {
    let tree = combined_tree();

    let top = tree.limited_to_depth(1);
    assert_eq!(top.children.len(), 3);
    assert!(top.children.iter().all(|c| c.children.is_empty()));
    assert!(tree.find(WALL).is_some());

    let root_only = tree.limited_to_depth(0);
    assert!(root_only.children.is_empty());
    assert_eq!(root_only.xpath, "/HPXML");
}

#[test]
fn test_check_value_against_enumeration() {
    let tree = combined_tree();
    let adjacent = tree.find(&format!("{}/ExteriorAdjacentTo", WALL)).unwrap();

    assert!(adjacent.check_value(Some("attic")).valid);
    assert!(adjacent.check_value(None).valid);

    let check = adjacent.check_value(Some("basement"));
    assert!(!check.valid);
    assert!(check.errors[0].contains("outside, attic, garage"));
}

#[test]
fn test_check_value_types_and_requiredness() {
    let tree = combined_tree();

    let area = tree.find(&format!("{}/Area", WINDOW)).unwrap();
    assert!(area.check_value(Some("12.5")).valid);
    let missing = area.check_value(None);
    assert!(!missing.valid);
    assert!(missing.errors[0].contains("required"));
    assert!(!area.check_value(Some("large")).valid);

    let grade = tree
        .find(&format!("{}/Insulation/InsulationGrade", WALL))
        .unwrap();
    let check = grade.check_value(Some("4"));
    assert!(!check.valid);

    let roof_type = tree.find(&format!("{}/RoofType", ROOF)).unwrap();
    assert!(roof_type.check_value(Some("gable")).valid);
}

#[test]
fn test_report_rules_surface_as_warnings() {
    let tree = combined_tree();
    let window = tree.find(WINDOW).unwrap();

    let check = window.check_value(Some("present"));
    assert!(check.valid);
    assert_eq!(
        check.warnings,
        vec!["Window SHGC should be verified against the product label.".to_string()]
    );

    // asserts are errors, not warnings
    let wall = tree.find(WALL).unwrap();
    assert!(wall.check_value(Some("present")).warnings.is_empty());
}

#[test]
fn test_tree_serializes_with_lowercase_kinds() {
    let tree = combined_tree();
    let json = serde_json::to_value(tree.find(WALL).unwrap()).unwrap();

    assert_eq!(json["kind"], "section");
    assert_eq!(json["repeatable"], true);
    assert_eq!(json["children"][1]["kind"], "field");
    assert_eq!(json["validations"][0]["severity"], "error");
}
