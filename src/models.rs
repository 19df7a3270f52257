//! Rule tree data model
//!
//! A parsed schema is a tree of [`RuleNode`]s. Sections group other nodes,
//! fields are leaf values carrying a primitive type and optional enumeration.
//! Business rules from a Schematron pass are attached as [`ValidationRule`]s.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single constraint attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub message: String,
    pub severity: String,
    pub test: Option<String>,
    pub context: Option<String>,
}

impl ValidationRule {
    pub fn new(message: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: severity.into(),
            test: None,
            context: None,
        }
    }

    pub fn with_test(mut self, test: impl Into<String>) -> Self {
        self.test = Some(test.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.severity.as_str(), "warning" | "warn")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Section,
    Field,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Section => "section",
            NodeKind::Field => "field",
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "section" => Ok(NodeKind::Section),
            "field" => Ok(NodeKind::Field),
            other => Err(format!("unknown node kind: {}", other)),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema element in the normalized tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleNode {
    pub xpath: String,
    pub name: String,
    pub kind: NodeKind,
    pub data_type: Option<String>,
    pub min_occurs: Option<u32>,
    pub max_occurs: Option<String>,
    pub repeatable: bool,
    #[serde(default)]
    pub enum_values: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub children: Vec<RuleNode>,
}

impl RuleNode {
    pub fn section(xpath: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(xpath, name, NodeKind::Section)
    }

    pub fn field(xpath: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(xpath, name, NodeKind::Field)
    }

    fn new(xpath: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            xpath: xpath.into(),
            name: name.into(),
            kind,
            data_type: None,
            min_occurs: None,
            max_occurs: None,
            repeatable: false,
            enum_values: Vec::new(),
            description: None,
            validations: Vec::new(),
            notes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set both occurrence bounds and derive `repeatable` from the upper one.
    pub fn with_occurs(mut self, min_occurs: Option<u32>, max_occurs: impl Into<String>) -> Self {
        let max_occurs = max_occurs.into();
        self.repeatable = is_repeatable(&max_occurs);
        self.min_occurs = min_occurs;
        self.max_occurs = Some(max_occurs);
        self
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_values = values;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_children(mut self, children: Vec<RuleNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_field(&self) -> bool {
        self.kind == NodeKind::Field
    }

    pub fn is_section(&self) -> bool {
        self.kind == NodeKind::Section
    }

    pub fn has_note(&self, note: &str) -> bool {
        self.notes.iter().any(|n| n == note)
    }

    /// Depth-first pre-order traversal of this node and all descendants.
    pub fn iter_nodes(&self) -> NodeIter<'_> {
        NodeIter { stack: vec![self] }
    }

    /// Number of nodes in the subtree, this one included.
    pub fn node_count(&self) -> usize {
        self.iter_nodes().count()
    }

    /// Locate a node by xpath. Trailing slashes are ignored and an empty path
    /// resolves to `self`.
    pub fn find(&self, xpath: &str) -> Option<&RuleNode> {
        let wanted = xpath.trim_end_matches('/');
        if wanted.is_empty() {
            return Some(self);
        }
        self.iter_nodes()
            .find(|node| node.xpath.trim_end_matches('/') == wanted)
    }

    pub fn find_mut(&mut self, xpath: &str) -> Option<&mut RuleNode> {
        let wanted = xpath.trim_end_matches('/');
        if wanted.is_empty() || self.xpath.trim_end_matches('/') == wanted {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(wanted))
    }

    pub fn field_children(&self) -> Vec<&RuleNode> {
        self.children.iter().filter(|c| c.is_field()).collect()
    }

    pub fn section_children(&self) -> Vec<&RuleNode> {
        self.children.iter().filter(|c| !c.is_field()).collect()
    }

    /// Case-insensitive substring search over node names and xpaths.
    ///
    /// Nodes filtered out by `kind` are still descended so that matching
    /// fields below a non-matching section are found.
    pub fn search(&self, query: &str, kind: Option<NodeKind>, limit: usize) -> Vec<&RuleNode> {
        let needle = query.to_lowercase();
        let mut matches = Vec::new();
        for node in self.iter_nodes() {
            if matches.len() >= limit {
                break;
            }
            if let Some(kind) = kind
                && node.kind != kind
            {
                continue;
            }
            if node.name.to_lowercase().contains(&needle)
                || node.xpath.to_lowercase().contains(&needle)
            {
                matches.push(node);
            }
        }
        matches
    }

    /// Copy of this subtree with children pruned below `max_depth` levels.
    pub fn limited_to_depth(&self, max_depth: usize) -> RuleNode {
        let mut copy = self.clone();
        prune_depth(&mut copy, max_depth, 0);
        copy
    }

    /// Check a candidate value against this node's constraints.
    pub fn check_value(&self, value: Option<&str>) -> ValueCheck {
        let value = value.filter(|v| !v.is_empty());
        let mut errors = Vec::new();

        if self.min_occurs.unwrap_or(0) > 0 && value.is_none() {
            errors.push(format!("Field '{}' is required", self.name));
        }

        if let Some(value) = value {
            if !self.enum_values.is_empty() && !self.enum_values.iter().any(|e| e == value) {
                errors.push(format!(
                    "Value '{}' not in allowed values: {}",
                    value,
                    self.enum_values.join(", ")
                ));
            }
            if let Some(data_type) = &self.data_type
                && !value_matches_type(value, data_type)
            {
                errors.push(format!(
                    "Value '{}' does not match expected type '{}'",
                    value, data_type
                ));
            }
        }

        let warnings = self
            .validations
            .iter()
            .filter(|rule| rule.is_warning())
            .map(|rule| rule.message.clone())
            .collect();

        ValueCheck {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Outcome of [`RuleNode::check_value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCheck {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct NodeIter<'a> {
    stack: Vec<&'a RuleNode>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a RuleNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// `true` when `max_occurs` is "unbounded" or an integer greater than one.
pub fn is_repeatable(max_occurs: &str) -> bool {
    max_occurs == "unbounded" || max_occurs.parse::<u64>().is_ok_and(|n| n > 1)
}

fn prune_depth(node: &mut RuleNode, max_depth: usize, current: usize) {
    if current >= max_depth {
        node.children.clear();
    } else {
        for child in &mut node.children {
            prune_depth(child, max_depth, current + 1);
        }
    }
}

fn value_matches_type(value: &str, data_type: &str) -> bool {
    match data_type {
        "integer" => value.parse::<i64>().is_ok(),
        "positiveInteger" => value.parse::<i64>().is_ok_and(|n| n > 0),
        "decimal" | "double" => value.parse::<f64>().is_ok(),
        "boolean" => matches!(value.to_lowercase().as_str(), "true" | "false" | "1" | "0"),
        "date" => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        _ => true,
    }
}
