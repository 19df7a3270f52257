//! XSD to rule tree conversion
//!
//! Only the part of XML Schema that HPXML relies on is modeled: top-level
//! elements, named and inline simple/complex types, `sequence`/`choice`/`all`
//! content models, `complexContent` extension and `simpleContent`. Attributes
//! are ignored.
//!
//! Tree building is bounded in three ways:
//!
//! * a hard recursion ceiling (`max_recursion_depth`) that yields a
//!   `[depth_limit_reached]` placeholder,
//! * a cumulative inheritance budget (`max_extension_depth`) that collapses
//!   deeply derived types into a childless section tagged
//!   `extension_chain_truncated`,
//! * cycle guards on element references and on the active xpath stack, both
//!   producing a section tagged `recursive_reference`.
//!
//! Everything except a missing root element degrades to an annotated node.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use roxmltree::{Document, Node, ParsingOptions};

use crate::config::ParserConfig;
use crate::error::{Result, SchemaError};
use crate::models::RuleNode;

pub const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";

/// Name given to nodes that stand in for subtrees beyond the recursion ceiling.
pub const DEPTH_LIMIT_NAME: &str = "[depth_limit_reached]";

/// Parse an XSD file and build the tree rooted at `root_name`.
pub fn parse_xsd(path: &Path, root_name: &str, config: &ParserConfig) -> Result<RuleNode> {
    let text = std::fs::read_to_string(path)?;
    parse_xsd_named(&text, root_name, config, &path.display().to_string())
}

/// Parse XSD text held in memory.
pub fn parse_xsd_str(text: &str, root_name: &str, config: &ParserConfig) -> Result<RuleNode> {
    parse_xsd_named(text, root_name, config, "<memory>")
}

fn parse_xsd_named(
    text: &str,
    root_name: &str,
    config: &ParserConfig,
    source_name: &str,
) -> Result<RuleNode> {
    let doc = parse_document(text, source_name)?;
    let mut parser = XsdParser::new(&doc, config.clone()).with_source_name(source_name);
    let tree = parser.parse(root_name)?;
    tracing::info!(
        source = source_name,
        root = root_name,
        nodes = tree.node_count(),
        "parsed schema"
    );
    Ok(tree)
}

/// Parse raw XML with the options every schema reader in this crate uses.
pub fn parse_document<'input>(text: &'input str, source_name: &str) -> Result<Document<'input>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    Document::parse_with_options(text, options).map_err(|e| SchemaError::XmlParse {
        source_name: source_name.to_string(),
        details: e.to_string(),
    })
}

#[derive(Debug, Clone)]
struct SimpleTypeInfo {
    base: Option<String>,
    enumerations: Vec<String>,
    documentation: Option<String>,
}

/// Cycle guards threaded through one tree build.
#[derive(Debug, Default)]
struct Guards {
    /// Xpaths currently being descended (ancestors of the node under construction)
    active_paths: HashSet<String>,
    /// Element references currently being expanded
    ref_chain: HashSet<String>,
}

/// An element occurrence inside a content model.
///
/// `decl` supplies name, type and content. `site` is where the element
/// appears and supplies the occurrence constraints; the two differ only for
/// `ref` particles.
#[derive(Clone, Copy)]
struct Particle<'a, 'input> {
    decl: Node<'a, 'input>,
    site: Node<'a, 'input>,
    ref_name: Option<&'a str>,
}

/// Index of one schema document plus the tree builder.
pub struct XsdParser<'a, 'input> {
    doc: &'a Document<'input>,
    config: ParserConfig,
    source_name: String,
    simple_types: HashMap<String, SimpleTypeInfo>,
    complex_types: HashMap<String, Node<'a, 'input>>,
    extension_chains: HashMap<String, Vec<String>>,
    resolved_refs: Option<HashMap<String, Node<'a, 'input>>>,
}

impl<'a, 'input> XsdParser<'a, 'input> {
    pub fn new(doc: &'a Document<'input>, config: ParserConfig) -> Self {
        let resolved_refs = config.cache_resolved_refs.then(HashMap::new);
        let mut parser = Self {
            doc,
            config,
            source_name: "<memory>".to_string(),
            simple_types: HashMap::new(),
            complex_types: HashMap::new(),
            extension_chains: HashMap::new(),
            resolved_refs,
        };
        parser.index_simple_types();
        parser.index_complex_types();
        if parser.config.track_extension_metadata {
            parser.index_extension_chains();
        }
        parser
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Inheritance chain (nearest ancestor first) recorded for a named complex type.
    pub fn extension_chain(&self, type_name: &str) -> Option<&[String]> {
        self.extension_chains.get(type_name).map(Vec::as_slice)
    }

    /// Build the tree for the top-level element `root_name`.
    pub fn parse(&mut self, root_name: &str) -> Result<RuleNode> {
        let root = self
            .find_element(root_name)
            .ok_or_else(|| SchemaError::RootElementNotFound {
                root: root_name.to_string(),
                source_name: self.source_name.clone(),
            })?;

        let particle = Particle {
            decl: root,
            site: root,
            ref_name: None,
        };
        let mut guards = Guards::default();
        Ok(self.build(particle, "", &mut guards, 0, 0))
    }

    fn schema_root(&self) -> Node<'a, 'input> {
        self.doc.root_element()
    }

    // ---------------------------------------------------------------- indexing

    fn index_simple_types(&mut self) {
        for node in xs_children(self.schema_root(), "simpleType") {
            let Some(name) = node.attribute("name") else {
                continue;
            };
            let restriction = xs_child(node, "restriction");
            let base = restriction
                .and_then(|r| r.attribute("base"))
                .map(|b| local_name(b).to_string());
            let enumerations = restriction.map(enumeration_values).unwrap_or_default();
            self.simple_types.insert(
                name.to_string(),
                SimpleTypeInfo {
                    base,
                    enumerations,
                    documentation: documentation(node),
                },
            );
        }
    }

    fn index_complex_types(&mut self) {
        for node in xs_children(self.schema_root(), "complexType") {
            if let Some(name) = node.attribute("name") {
                self.complex_types.insert(name.to_string(), node);
            }
        }
    }

    fn index_extension_chains(&mut self) {
        let mut chains = HashMap::new();
        for name in self.complex_types.keys() {
            let chain = self.compute_extension_chain(name, HashSet::new());
            if !chain.is_empty() {
                chains.insert(name.clone(), chain);
            }
        }
        self.extension_chains = chains;
    }

    fn compute_extension_chain(&self, type_name: &str, mut visited: HashSet<String>) -> Vec<String> {
        if !visited.insert(type_name.to_string()) {
            return Vec::new();
        }
        let Some(node) = self.complex_types.get(type_name) else {
            return Vec::new();
        };
        let base = xs_child(*node, "complexContent")
            .and_then(|cc| xs_child(cc, "extension"))
            .and_then(|ext| ext.attribute("base"))
            .map(local_name);

        match base {
            Some(base) if self.complex_types.contains_key(base) => {
                let mut chain = vec![base.to_string()];
                chain.extend(self.compute_extension_chain(base, visited));
                chain
            }
            _ => Vec::new(),
        }
    }

    /// Locate a top-level element declaration, memoized when
    /// `cache_resolved_refs` is set.
    fn find_element(&mut self, name: &str) -> Option<Node<'a, 'input>> {
        if let Some(cache) = &self.resolved_refs
            && let Some(node) = cache.get(name)
        {
            return Some(*node);
        }
        let found = xs_children(self.schema_root(), "element")
            .find(|el| el.attribute("name") == Some(name))?;
        if let Some(cache) = &mut self.resolved_refs {
            cache.insert(name.to_string(), found);
        }
        Some(found)
    }

    // ---------------------------------------------------------------- building

    fn build(
        &mut self,
        element: Particle<'a, 'input>,
        parent_xpath: &str,
        guards: &mut Guards,
        depth: usize,
        extension_depth: usize,
    ) -> RuleNode {
        let max_depth = self.config.max_recursion_depth;
        if depth > max_depth {
            return RuleNode::section(format!("{}/...", parent_xpath), DEPTH_LIMIT_NAME)
                .with_note(format!("max_depth_{}_exceeded", max_depth))
                .with_description(Some(format!(
                    "Maximum recursion depth ({}) exceeded",
                    max_depth
                )));
        }

        let site = element.site;
        let Some(reference) = site.attribute("ref") else {
            return match site.attribute("name") {
                Some(name) => {
                    self.build_named(element, name, parent_xpath, guards, depth, extension_depth)
                }
                None => placeholder(site, parent_xpath, "[anonymous]", "anonymous_element"),
            };
        };

        let ref_name = local_name(reference);
        if guards.ref_chain.contains(ref_name) {
            return placeholder(site, parent_xpath, ref_name, "recursive_reference");
        }
        let Some(decl) = self.find_element(ref_name) else {
            tracing::debug!(reference = ref_name, "unresolved element reference");
            return placeholder(site, parent_xpath, ref_name, "unresolved_reference");
        };

        guards.ref_chain.insert(ref_name.to_string());
        let resolved = Particle {
            decl,
            site,
            ref_name: Some(ref_name),
        };
        let node = self.build_named(resolved, ref_name, parent_xpath, guards, depth, extension_depth);
        guards.ref_chain.remove(ref_name);
        node
    }

    fn build_named(
        &mut self,
        element: Particle<'a, 'input>,
        name: &str,
        parent_xpath: &str,
        guards: &mut Guards,
        depth: usize,
        extension_depth: usize,
    ) -> RuleNode {
        let xpath = format!("{}/{}", parent_xpath, name);
        if guards.active_paths.contains(&xpath) {
            return RuleNode::section(xpath, name).with_note("recursive_reference");
        }

        guards.active_paths.insert(xpath.clone());
        let node = self.classify(element, name, &xpath, guards, depth, extension_depth);
        guards.active_paths.remove(&xpath);
        node
    }

    fn classify(
        &mut self,
        element: Particle<'a, 'input>,
        name: &str,
        xpath: &str,
        guards: &mut Guards,
        depth: usize,
        extension_depth: usize,
    ) -> RuleNode {
        let decl = element.decl;
        let (min_occurs, max_occurs) = occurs(element);
        let type_name = decl.attribute("type").map(local_name);
        let description = documentation(decl).or_else(|| self.type_documentation(type_name));
        let base = RuleNode::section(xpath, name)
            .with_occurs(min_occurs, max_occurs)
            .with_description(description);

        let is_extension_point = match element.ref_name {
            Some(reference) => reference == "extension" && !self.config.resolve_extension_refs,
            None => name == "extension",
        };
        if is_extension_point {
            let mut node = base
                .with_note("extension_point")
                .with_description(Some("Extension point for custom data".to_string()));
            if self.config.track_extension_metadata {
                node.notes.push("allows_custom_data".to_string());
                if extension_depth > 0 {
                    node.notes.push(format!("extension_depth_{}", extension_depth));
                }
            }
            return node;
        }

        let mut new_extension_depth = extension_depth;
        if self.config.track_extension_metadata
            && let Some(chain) = type_name.and_then(|t| self.extension_chains.get(t))
        {
            new_extension_depth += chain.len();
            if new_extension_depth > self.config.max_extension_depth {
                let shown: Vec<&str> = chain.iter().take(2).map(String::as_str).collect();
                return base
                    .with_note("extension_chain_truncated")
                    .with_note(format!("inherits_from_{}_types", chain.len()))
                    .with_note(format!("base_types: {}", shown.join(", ")))
                    .with_description(Some(format!(
                        "Complex type with {}-level inheritance (truncated at depth {})",
                        chain.len(),
                        self.config.max_extension_depth
                    )));
            }
        }

        if let Some(simple) = xs_child(decl, "simpleType") {
            let (data_type, enums) = self.inline_simple_type(simple);
            return as_field(base, data_type, enums);
        }

        let complex = xs_child(decl, "complexType")
            .or_else(|| type_name.and_then(|t| self.complex_types.get(t).copied()));
        if let Some(complex) = complex {
            if xs_child(complex, "simpleContent").is_some() {
                let (data_type, enums) = self.simple_content_type(complex, &mut HashSet::new());
                return as_field(base, data_type, enums);
            }
            let children =
                self.complex_children(complex, xpath, guards, depth + 1, new_extension_depth);
            return base.with_children(children);
        }

        let (data_type, enums) = self.resolve_type(type_name);
        as_field(base, data_type, enums)
    }

    /// Children of a complex type: inherited base content first, then the
    /// type's own particles, in declaration order.
    fn complex_children(
        &mut self,
        complex: Node<'a, 'input>,
        xpath: &str,
        guards: &mut Guards,
        depth: usize,
        extension_depth: usize,
    ) -> Vec<RuleNode> {
        let mut children = Vec::new();
        let mut seen_types = HashSet::new();
        self.collect_type_content(
            complex,
            xpath,
            guards,
            depth,
            extension_depth,
            &mut seen_types,
            &mut children,
        );
        children
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_type_content(
        &mut self,
        complex: Node<'a, 'input>,
        xpath: &str,
        guards: &mut Guards,
        depth: usize,
        extension_depth: usize,
        seen_types: &mut HashSet<String>,
        children: &mut Vec<RuleNode>,
    ) {
        let derivation = xs_child(complex, "complexContent").and_then(|cc| {
            xs_child(cc, "extension").or_else(|| xs_child(cc, "restriction"))
        });

        let Some(derivation) = derivation else {
            self.collect_particles(complex, false, xpath, guards, depth, extension_depth, children);
            return;
        };

        if derivation.tag_name().name() == "extension"
            && let Some(base) = derivation.attribute("base").map(local_name)
            && let Some(base_type) = self.complex_types.get(base).copied()
            && seen_types.insert(base.to_string())
        {
            self.collect_type_content(
                base_type,
                xpath,
                guards,
                depth,
                extension_depth,
                seen_types,
                children,
            );
        }
        self.collect_particles(derivation, false, xpath, guards, depth, extension_depth, children);
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_particles(
        &mut self,
        container: Node<'a, 'input>,
        in_choice: bool,
        xpath: &str,
        guards: &mut Guards,
        depth: usize,
        extension_depth: usize,
        children: &mut Vec<RuleNode>,
    ) {
        for child in container
            .children()
            .filter(|n| n.is_element() && n.tag_name().namespace() == Some(XS_NS))
        {
            match child.tag_name().name() {
                "element" if is_model_group(container) => {
                    let particle = Particle {
                        decl: child,
                        site: child,
                        ref_name: None,
                    };
                    let mut node = self.build(particle, xpath, guards, depth, extension_depth);
                    if in_choice {
                        node.notes.push("choice".to_string());
                    }
                    if !children.contains(&node) {
                        children.push(node);
                    }
                }
                "sequence" | "all" => self.collect_particles(
                    child,
                    in_choice,
                    xpath,
                    guards,
                    depth,
                    extension_depth,
                    children,
                ),
                "choice" => {
                    self.collect_particles(child, true, xpath, guards, depth, extension_depth, children)
                }
                _ => {}
            }
        }
    }

    // ---------------------------------------------------------------- types

    fn inline_simple_type(&self, simple: Node<'a, 'input>) -> (String, Vec<String>) {
        let Some(restriction) = xs_child(simple, "restriction") else {
            return ("string".to_string(), Vec::new());
        };
        let base = restriction
            .attribute("base")
            .map(local_name)
            .filter(|b| !b.is_empty())
            .unwrap_or("string")
            .to_string();
        let inline = enumeration_values(restriction);
        let enums = if inline.is_empty() {
            self.collect_enum_values(&base)
        } else {
            inline
        };
        (base, enums)
    }

    /// Resolve a `simpleContent` complex type to the value type it carries.
    fn simple_content_type(
        &self,
        complex: Node<'a, 'input>,
        seen: &mut HashSet<String>,
    ) -> (String, Vec<String>) {
        let derivation = xs_child(complex, "simpleContent").and_then(|sc| {
            xs_child(sc, "extension").or_else(|| xs_child(sc, "restriction"))
        });
        let Some(derivation) = derivation else {
            return ("string".to_string(), Vec::new());
        };
        let inline = enumeration_values(derivation);
        let base = derivation.attribute("base").map(local_name);

        let (data_type, inherited) = match base {
            Some(base) if self.complex_types.contains_key(base) && seen.insert(base.to_string()) => {
                let base_type = self.complex_types[base];
                self.simple_content_type(base_type, seen)
            }
            other => self.resolve_type(other),
        };

        let enums = if inline.is_empty() { inherited } else { inline };
        (data_type, enums)
    }

    /// Resolve a named simple (or built-in) type to its base type name and
    /// the enumeration values collected along its base chain.
    fn resolve_type(&self, type_name: Option<&str>) -> (String, Vec<String>) {
        let Some(type_name) = type_name.filter(|t| !t.is_empty()) else {
            return ("string".to_string(), Vec::new());
        };
        let enums = self.collect_enum_values(type_name);
        let data_type = self
            .simple_types
            .get(type_name)
            .and_then(|info| info.base.clone())
            .unwrap_or_else(|| type_name.to_string());
        (data_type, enums)
    }

    fn collect_enum_values(&self, type_name: &str) -> Vec<String> {
        let mut values = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(type_name.to_string());
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                break;
            }
            let Some(info) = self.simple_types.get(&name) else {
                break;
            };
            values.extend(info.enumerations.iter().cloned());
            current = info.base.clone();
        }
        values
    }

    fn type_documentation(&self, type_name: Option<&str>) -> Option<String> {
        let type_name = type_name?;
        if let Some(node) = self.complex_types.get(type_name) {
            return documentation(*node);
        }
        self.simple_types
            .get(type_name)
            .and_then(|info| info.documentation.clone())
    }
}

// -------------------------------------------------------------------- helpers

fn xs_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    local: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| {
        n.is_element() && n.tag_name().namespace() == Some(XS_NS) && n.tag_name().name() == local
    })
}

fn xs_child<'a, 'input: 'a>(node: Node<'a, 'input>, local: &'static str) -> Option<Node<'a, 'input>> {
    xs_children(node, local).next()
}

fn is_model_group(node: Node<'_, '_>) -> bool {
    matches!(node.tag_name().name(), "sequence" | "choice" | "all")
}

fn enumeration_values(restriction: Node<'_, '_>) -> Vec<String> {
    xs_children(restriction, "enumeration")
        .filter_map(|e| e.attribute("value"))
        .map(str::to_string)
        .collect()
}

/// First `xs:annotation/xs:documentation` text, whitespace collapsed.
fn documentation(node: Node<'_, '_>) -> Option<String> {
    let text: String = xs_children(node, "annotation")
        .flat_map(|a| xs_children(a, "documentation"))
        .find_map(|d| d.text().map(str::to_string))?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Occurrence bounds, with the referencing site taking precedence.
fn occurs(element: Particle<'_, '_>) -> (Option<u32>, String) {
    let min = element
        .site
        .attribute("minOccurs")
        .or_else(|| element.decl.attribute("minOccurs"));
    let max = element
        .site
        .attribute("maxOccurs")
        .or_else(|| element.decl.attribute("maxOccurs"))
        .unwrap_or("1");
    (parse_min_occurs(min), max.to_string())
}

/// `minOccurs` defaults to 1 and is `None` when not a plain number.
fn parse_min_occurs(value: Option<&str>) -> Option<u32> {
    match value {
        None => Some(1),
        Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => v.parse().ok(),
        Some(_) => None,
    }
}

fn placeholder(site: Node<'_, '_>, parent_xpath: &str, name: &str, note: &str) -> RuleNode {
    let (min_occurs, max_occurs) = occurs(Particle {
        decl: site,
        site,
        ref_name: None,
    });
    RuleNode::section(format!("{}/{}", parent_xpath, name), name)
        .with_occurs(min_occurs, max_occurs)
        .with_note(note)
}

fn as_field(base: RuleNode, data_type: String, enums: Vec<String>) -> RuleNode {
    let mut field = base.with_data_type(data_type).with_enum_values(enums);
    field.kind = crate::models::NodeKind::Field;
    field
}

fn local_name(qname: &str) -> &str {
    qname.split_once(':').map_or(qname, |(_, local)| local)
}
