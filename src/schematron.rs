//! Schematron business rules
//!
//! Assertions are extracted from `pattern/rule/(assert|report)` and attached
//! to rule tree nodes whose xpath matches the rule context once namespace
//! prefixes are removed. Test expressions are stored, never evaluated.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{RuleNode, ValidationRule};
use crate::xsd_parser::parse_document;

pub const SCH_NS: &str = "http://purl.oclc.org/dsdl/schematron";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionKind {
    Assert,
    Report,
}

impl AssertionKind {
    fn default_severity(self) -> &'static str {
        match self {
            AssertionKind::Assert => "error",
            AssertionKind::Report => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchematronAssertion {
    pub context: String,
    pub message: String,
    pub test: String,
    pub severity: String,
    pub kind: AssertionKind,
}

impl SchematronAssertion {
    fn to_validation_rule(&self) -> ValidationRule {
        let rule = ValidationRule::new(self.message.clone(), self.severity.clone())
            .with_context(self.context.clone());
        if self.test.is_empty() {
            rule
        } else {
            rule.with_test(self.test.clone())
        }
    }
}

/// All assertions of one Schematron document, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub source: Option<String>,
    pub assertions: Vec<SchematronAssertion>,
}

/// Outcome of attaching a [`RuleSet`] to a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    pub attached: usize,
    pub unmatched: usize,
    pub unmatched_contexts: Vec<String>,
}

pub fn parse_schematron(path: &Path) -> Result<RuleSet> {
    let text = std::fs::read_to_string(path)?;
    let mut rules = parse_schematron_str(&text, &path.display().to_string())?;
    rules.source = Some(path.display().to_string());
    Ok(rules)
}

pub fn parse_schematron_str(text: &str, source_name: &str) -> Result<RuleSet> {
    let doc = parse_document(text, source_name)?;
    let mut assertions = Vec::new();

    for pattern in sch_children(doc.root_element(), "pattern") {
        for rule in sch_children(pattern, "rule") {
            let Some(context) = rule.attribute("context").filter(|c| !c.is_empty()) else {
                continue;
            };
            // asserts before reports within a rule
            for (local, kind) in [("assert", AssertionKind::Assert), ("report", AssertionKind::Report)] {
                for node in sch_children(rule, local) {
                    assertions.push(SchematronAssertion {
                        context: context.to_string(),
                        message: node.text().unwrap_or_default().trim().to_string(),
                        test: node.attribute("test").unwrap_or_default().to_string(),
                        severity: node
                            .attribute("role")
                            .map(str::to_lowercase)
                            .unwrap_or_else(|| kind.default_severity().to_string()),
                        kind,
                    });
                }
            }
        }
    }

    tracing::info!(source = source_name, assertions = assertions.len(), "parsed schematron");
    Ok(RuleSet {
        source: None,
        assertions,
    })
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    /// Append each assertion to the node its context points at.
    pub fn attach_to_tree(&self, root: &mut RuleNode) -> AttachReport {
        let index = xpath_index(root);
        let mut report = AttachReport::default();

        for assertion in &self.assertions {
            let target = index
                .get(&normalize_xpath(&assertion.context))
                .and_then(|route| node_at_mut(root, route));
            match target {
                Some(node) => {
                    node.validations.push(assertion.to_validation_rule());
                    report.attached += 1;
                }
                None => {
                    report.unmatched += 1;
                    if !report.unmatched_contexts.contains(&assertion.context) {
                        report.unmatched_contexts.push(assertion.context.clone());
                    }
                }
            }
        }

        if report.unmatched > 0 {
            tracing::warn!(
                attached = report.attached,
                unmatched = report.unmatched,
                contexts = ?report.unmatched_contexts,
                "schematron rules without a matching node"
            );
        } else {
            tracing::info!(attached = report.attached, "attached schematron rules");
        }
        report
    }
}

/// Remove namespace prefixes and canonicalize slashes.
pub fn normalize_xpath(path: &str) -> String {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    let stripped = match PREFIX.get_or_init(|| Regex::new(r"[A-Za-z_][\w.-]*:").ok()) {
        Some(re) => re.replace_all(path, "").into_owned(),
        None => path.to_string(),
    };
    let trimmed = stripped.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Map each normalized xpath to the child-index route of its last
/// occurrence in pre-order.
fn xpath_index(root: &RuleNode) -> HashMap<String, Vec<usize>> {
    let mut index = HashMap::new();
    let mut stack = vec![(root, Vec::new())];
    while let Some((node, route)) = stack.pop() {
        index.insert(normalize_xpath(&node.xpath), route.clone());
        for (i, child) in node.children.iter().enumerate().rev() {
            let mut child_route = route.clone();
            child_route.push(i);
            stack.push((child, child_route));
        }
    }
    index
}

fn node_at_mut<'a>(root: &'a mut RuleNode, route: &[usize]) -> Option<&'a mut RuleNode> {
    route
        .iter()
        .try_fold(root, |node, &i| node.children.get_mut(i))
}

fn sch_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    local: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| {
        n.is_element() && n.tag_name().namespace() == Some(SCH_NS) && n.tag_name().name() == local
    })
}
