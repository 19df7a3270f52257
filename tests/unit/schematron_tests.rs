use hpxml_schema::schematron::AssertionKind;
use hpxml_schema::{ParserConfig, parse_schematron, parse_xsd};

use crate::common::{TestFixtures, WALL, WINDOW};

#[test]
fn test_sample_rules_are_extracted_in_order() {
    let rules = parse_schematron(&TestFixtures::new().sample_schematron()).unwrap();

    assert_eq!(rules.len(), 4);
    assert!(rules.source.as_deref().unwrap().ends_with("sample_schematron.xml"));

    let first = &rules.assertions[0];
    assert_eq!(first.kind, AssertionKind::Assert);
    assert_eq!(first.severity, "error");
    assert_eq!(first.message, "Wall must have a SystemIdentifier.");
    assert_eq!(first.test, "count(h:SystemIdentifier) = 1");

    let report = &rules.assertions[2];
    assert_eq!(report.kind, AssertionKind::Report);
    assert_eq!(report.severity, "warning");
    assert_eq!(report.test, "number(h:SHGC) > 0");
}

#[test]
fn test_rules_attach_to_matching_nodes() {
    let fixtures = TestFixtures::new();
    let mut tree = parse_xsd(&fixtures.sample_xsd(), "HPXML", &ParserConfig::default()).unwrap();
    let rules = parse_schematron(&fixtures.sample_schematron()).unwrap();

    let report = rules.attach_to_tree(&mut tree);
    assert_eq!(report.attached, 3);
    assert_eq!(report.unmatched, 1);
    assert_eq!(report.unmatched_contexts.len(), 1);
    assert!(report.unmatched_contexts[0].contains("PVSystem"));

    let wall = tree.find(WALL).unwrap();
    assert_eq!(wall.validations.len(), 2);
    assert!(wall.validations.iter().all(|v| v.severity == "error"));
    assert_eq!(
        wall.validations[0].context.as_deref(),
        Some("/h:HPXML/h:Building/h:BuildingDetails/h:Enclosure/h:Walls/h:Wall")
    );

    let window = tree.find(WINDOW).unwrap();
    assert_eq!(window.validations.len(), 1);
    assert!(window.validations[0].is_warning());

    let total: usize = tree.iter_nodes().map(|n| n.validations.len()).sum();
    assert_eq!(total, 3);
}

#[test]
fn test_attaching_twice_appends_again() {
    let fixtures = TestFixtures::new();
    let mut tree = parse_xsd(&fixtures.sample_xsd(), "HPXML", &ParserConfig::default()).unwrap();
    let rules = parse_schematron(&fixtures.sample_schematron()).unwrap();

    rules.attach_to_tree(&mut tree);
    rules.attach_to_tree(&mut tree);
    assert_eq!(tree.find(WALL).unwrap().validations.len(), 4);
}
