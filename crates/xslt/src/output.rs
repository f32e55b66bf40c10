//! Result-tree construction and serialisation.
//!
//! Instructions produce flat lists of [`OutputItem`]s; adjacent text runs
//! merge as they are appended, mirroring how text lands in an element's
//! content or the preceding sibling's tail.

use std::collections::HashMap;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesPI, BytesStart, BytesText, Event};
use xylem_xpath1::{Document, NodeId, NodeKind, NodeRef, NodeTree};

use crate::error::XsltError;

#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    Text(String),
    Element(OutputElement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<OutputItem>,
}

impl OutputElement {
    pub fn new(name: String) -> Self {
        OutputElement {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn push(&mut self, item: OutputItem) {
        push_item(&mut self.children, item);
    }
}

/// Appends an item, merging adjacent text runs.
pub fn push_item(items: &mut Vec<OutputItem>, item: OutputItem) {
    match item {
        OutputItem::Text(text) => {
            if text.is_empty() {
                return;
            }
            if let Some(OutputItem::Text(existing)) = items.last_mut() {
                existing.push_str(&text);
            } else {
                items.push(OutputItem::Text(text));
            }
        }
        element => items.push(element),
    }
}

/// Deep-copies nodes into output items, for `xsl:copy-of`. A fragment root
/// contributes its children; attribute nodes contribute their value as
/// text; comments and processing instructions are outside the minimal
/// result model and are dropped.
pub fn copy_nodes(nodes: &[NodeRef]) -> Vec<OutputItem> {
    let mut items = Vec::new();
    for node in nodes {
        copy_node(node, &mut items);
    }
    items
}

fn copy_node(node: &NodeRef, items: &mut Vec<OutputItem>) {
    match node.kind() {
        NodeKind::Root => {
            for child in node.children() {
                copy_node(&child, items);
            }
        }
        NodeKind::Element => {
            let mut element = OutputElement::new(qualified_name(node));
            for attr in node.attributes() {
                element
                    .attributes
                    .push((qualified_name(&attr), attr.string_value()));
            }
            for child in node.children() {
                copy_node(&child, &mut element.children);
            }
            items.push(OutputItem::Element(element));
        }
        NodeKind::Text => push_item(items, OutputItem::Text(node.string_value())),
        NodeKind::Attribute => push_item(items, OutputItem::Text(node.string_value())),
        NodeKind::Namespace | NodeKind::Comment | NodeKind::ProcessingInstruction => {}
    }
}

fn qualified_name(node: &NodeRef) -> String {
    match node.name() {
        Some(q) => match q.prefix {
            Some(prefix) => format!("{}:{}", prefix, q.local_part),
            None => q.local_part.to_string(),
        },
        None => String::new(),
    }
}

/// Builds a result-tree fragment: the items re-materialised as a node tree
/// under a synthetic root, so fragments behave like node-sets.
pub fn items_to_fragment(
    items: &[OutputItem],
    namespaces: &HashMap<String, String>,
) -> Document {
    let mut tree = NodeTree::new();
    let root = tree.root_id();
    for item in items {
        add_item(&mut tree, root, item, namespaces);
    }
    tree.into_document()
}

fn add_item(
    tree: &mut NodeTree,
    parent: NodeId,
    item: &OutputItem,
    namespaces: &HashMap<String, String>,
) {
    match item {
        OutputItem::Text(text) => tree.append_text(parent, text),
        OutputItem::Element(element) => {
            let (prefix, local) = split_name(&element.name);
            let uri = prefix
                .as_deref()
                .and_then(|p| namespaces.get(p).cloned());
            let id = tree.append_element(parent, prefix, uri, local);
            for (name, value) in &element.attributes {
                let (prefix, local) = split_name(name);
                let uri = prefix
                    .as_deref()
                    .and_then(|p| namespaces.get(p).cloned());
                tree.append_attribute(id, prefix, uri, local, value.clone());
            }
            for child in &element.children {
                add_item(tree, id, child, namespaces);
            }
        }
    }
}

fn split_name(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

/// Serialises output items as XML text.
pub fn serialize(items: &[OutputItem]) -> Result<String, XsltError> {
    let mut writer = Writer::new(Vec::new());
    for item in items {
        write_item(&mut writer, item)?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| XsltError::Serialize(e.to_string()))
}

fn write_item(writer: &mut Writer<Vec<u8>>, item: &OutputItem) -> Result<(), XsltError> {
    match item {
        OutputItem::Text(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| XsltError::Serialize(e.to_string())),
        OutputItem::Element(element) => {
            let mut start = BytesStart::new(element.name.as_str());
            for (name, value) in &element.attributes {
                start.push_attribute((name.as_str(), value.as_str()));
            }
            if element.children.is_empty() {
                writer
                    .write_event(Event::Empty(start))
                    .map_err(|e| XsltError::Serialize(e.to_string()))
            } else {
                writer
                    .write_event(Event::Start(start))
                    .map_err(|e| XsltError::Serialize(e.to_string()))?;
                for child in &element.children {
                    write_item(writer, child)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(element.name.as_str())))
                    .map_err(|e| XsltError::Serialize(e.to_string()))
            }
        }
    }
}

/// Canonical serialisation of a parsed document: both sides of a
/// conformance comparison pass through this, so formatting differences
/// cancel out.
pub fn serialize_document(doc: &Document) -> Result<String, XsltError> {
    let mut writer = Writer::new(Vec::new());
    for child in doc.root().children() {
        write_node(&mut writer, &child)?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| XsltError::Serialize(e.to_string()))
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &NodeRef) -> Result<(), XsltError> {
    match node.kind() {
        NodeKind::Element => {
            let name = qualified_name(node);
            let attributes: Vec<(String, String)> = node
                .attributes()
                .map(|a| (qualified_name(&a), a.string_value()))
                .collect();
            let mut start = BytesStart::new(name.as_str());
            for (attr_name, attr_value) in &attributes {
                start.push_attribute((attr_name.as_str(), attr_value.as_str()));
            }
            if node.children().next().is_none() {
                writer
                    .write_event(Event::Empty(start))
                    .map_err(|e| XsltError::Serialize(e.to_string()))
            } else {
                writer
                    .write_event(Event::Start(start))
                    .map_err(|e| XsltError::Serialize(e.to_string()))?;
                for child in node.children() {
                    write_node(writer, &child)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(name.as_str())))
                    .map_err(|e| XsltError::Serialize(e.to_string()))
            }
        }
        NodeKind::Text => writer
            .write_event(Event::Text(BytesText::new(&node.string_value())))
            .map_err(|e| XsltError::Serialize(e.to_string())),
        NodeKind::Comment => writer
            .write_event(Event::Comment(BytesText::new(&node.string_value())))
            .map_err(|e| XsltError::Serialize(e.to_string())),
        NodeKind::ProcessingInstruction => {
            let content = format!(
                "{} {}",
                node.name().map(|q| q.local_part.to_string()).unwrap_or_default(),
                node.string_value()
            );
            writer
                .write_event(Event::PI(BytesPI::new(content.trim_end())))
                .map_err(|e| XsltError::Serialize(e.to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> OutputItem {
        OutputItem::Text(s.to_string())
    }

    #[test]
    fn test_adjacent_text_merges() {
        let mut items = Vec::new();
        push_item(&mut items, text("a"));
        push_item(&mut items, text("b"));
        push_item(&mut items, OutputItem::Element(OutputElement::new("x".into())));
        push_item(&mut items, text("c"));
        push_item(&mut items, text(""));
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], text("ab"));
        assert_eq!(items[2], text("c"));
    }

    #[test]
    fn test_serialize_escapes_markup() {
        let mut element = OutputElement::new("p".into());
        element.attributes.push(("title".into(), "a<b".into()));
        element.push(text("x < y & z"));
        let out = serialize(&[OutputItem::Element(element)]).unwrap();
        assert_eq!(out, "<p title=\"a&lt;b\">x &lt; y &amp; z</p>");
    }

    #[test]
    fn test_fragment_round_trip() {
        let mut element = OutputElement::new("item".into());
        element.attributes.push(("id".into(), "1".into()));
        element.push(text("hello"));
        let items = vec![text("lead "), OutputItem::Element(element)];
        let fragment = items_to_fragment(&items, &HashMap::new());

        let root = fragment.root();
        let children: Vec<NodeRef> = root.children().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].string_value(), "lead ");
        assert_eq!(children[1].attribute("id"), Some("1"));
        assert_eq!(root.string_value(), "lead hello");

        // And the fragment deep-copies back to equal items.
        let copied = copy_nodes(&[root]);
        assert_eq!(serialize(&copied).unwrap(), "lead <item id=\"1\">hello</item>");
    }

    #[test]
    fn test_serialize_document_is_canonical() {
        let doc = Document::parse("<r  b=\"2\" a=\"1\"  ><x/></r>").unwrap();
        let out = serialize_document(&doc).unwrap();
        assert_eq!(out, "<r a=\"1\" b=\"2\"><x/></r>");
    }
}
