//! The materialised XPath view of an XML document.
//!
//! Nodes live in an arena (`NodeTree`) and are addressed by stable indices;
//! a [`NodeRef`] is a cheap reference-counted handle pairing the tree with
//! an index. Parent links are plain indices, so dropping the last handle to
//! a tree reclaims every node at once. Node identity is the (tree, index)
//! pair; two nodes with equal content are still distinct nodes.

mod build;
mod strip;

pub use build::parse_tree;
pub use strip::{StripPolicy, strip_whitespace};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::XPathError;

/// Stable arena index of a node within its tree.
pub type NodeId = usize;

/// A qualified name, consisting of an optional prefix and a local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub local_part: &'a str,
}

/// The seven node kinds of the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Element,
    Attribute,
    Namespace,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeData {
    Root {
        children: Vec<NodeId>,
    },
    Element {
        parent: NodeId,
        prefix: Option<String>,
        uri: Option<String>,
        local: String,
        children: Vec<NodeId>,
        attributes: Vec<NodeId>,
        namespaces: Vec<NodeId>,
    },
    Attribute {
        parent: NodeId,
        prefix: Option<String>,
        uri: Option<String>,
        local: String,
        value: String,
    },
    Namespace {
        parent: NodeId,
        prefix: String,
        uri: String,
    },
    Text {
        parent: NodeId,
        text: String,
    },
    Comment {
        parent: NodeId,
        text: String,
    },
    ProcessingInstruction {
        parent: NodeId,
        target: String,
        value: String,
    },
}

const ROOT: NodeId = 0;

/// The arena holding every node of one document (or result-tree fragment).
///
/// A tree is mutable while it is being built or whitespace-stripped; calling
/// [`NodeTree::into_document`] freezes it behind an `Rc` for evaluation.
#[derive(Debug)]
pub struct NodeTree {
    pub(crate) nodes: Vec<NodeData>,
    /// Document-order index per node id, assigned by `finalize`.
    pub(crate) order: Vec<usize>,
    /// Node ids sorted by document order (the inverse of `order`).
    pub(crate) order_index: Vec<NodeId>,
    /// `xml:id` / un-namespaced `id` attribute values, first element wins.
    pub(crate) ids: HashMap<String, NodeId>,
    /// Document-level prefix bindings, first binding wins; `xml` is implicit.
    pub(crate) namespaces: HashMap<String, String>,
}

impl NodeTree {
    /// Creates a tree containing only a root node.
    pub fn new() -> Self {
        NodeTree {
            nodes: vec![NodeData::Root { children: Vec::new() }],
            order: Vec::new(),
            order_index: Vec::new(),
            ids: HashMap::new(),
            namespaces: HashMap::new(),
        }
    }

    /// Builds a tree from an XML source; see [`parse_tree`].
    pub fn parse(source: &str) -> Result<Self, XPathError> {
        parse_tree(source)
    }

    pub fn root_id(&self) -> NodeId {
        ROOT
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces
            .entry(prefix.to_string())
            .or_insert_with(|| uri.to_string());
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(data);
        id
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        prefix: Option<String>,
        uri: Option<String>,
        local: String,
    ) -> NodeId {
        let id = self.push(NodeData::Element {
            parent,
            prefix,
            uri,
            local,
            children: Vec::new(),
            attributes: Vec::new(),
            namespaces: Vec::new(),
        });
        self.children_mut(parent).push(id);
        id
    }

    /// Attaches an attribute, keeping the element's attribute list sorted by
    /// (namespace-URI, local-name) and unique per expanded name.
    pub fn append_attribute(
        &mut self,
        element: NodeId,
        prefix: Option<String>,
        uri: Option<String>,
        local: String,
        value: String,
    ) -> NodeId {
        let id = self.push(NodeData::Attribute {
            parent: element,
            prefix,
            uri,
            local,
            value,
        });
        let sort_key = |tree: &NodeTree, id: NodeId| match &tree.nodes[id] {
            NodeData::Attribute { uri, local, .. } => (uri.clone(), local.clone()),
            _ => unreachable!("attribute list holds attribute nodes"),
        };
        let key = sort_key(self, id);
        let attrs = match &self.nodes[element] {
            NodeData::Element { attributes, .. } => attributes.clone(),
            _ => panic!("attributes can only be attached to elements"),
        };
        let mut insert_at = attrs.len();
        let mut replace = None;
        for (i, &existing) in attrs.iter().enumerate() {
            let existing_key = sort_key(self, existing);
            if existing_key == key {
                replace = Some(i);
                break;
            }
            if existing_key > key {
                insert_at = i;
                break;
            }
        }
        if let NodeData::Element { attributes, .. } = &mut self.nodes[element] {
            match replace {
                Some(i) => attributes[i] = id,
                None => attributes.insert(insert_at, id),
            }
        }
        id
    }

    pub fn append_namespace(&mut self, element: NodeId, prefix: String, uri: String) -> NodeId {
        let id = self.push(NodeData::Namespace {
            parent: element,
            prefix,
            uri,
        });
        if let NodeData::Element { namespaces, .. } = &mut self.nodes[element] {
            namespaces.push(id);
        }
        id
    }

    /// Appends character data, merging with a trailing text sibling so text
    /// nodes are never empty and never adjacent.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        let last = self.children(parent).last().copied();
        if let Some(last) = last
            && let NodeData::Text { text: existing, .. } = &mut self.nodes[last]
        {
            existing.push_str(text);
            return;
        }
        let id = self.push(NodeData::Text {
            parent,
            text: text.to_string(),
        });
        self.children_mut(parent).push(id);
    }

    pub fn append_comment(&mut self, parent: NodeId, text: String) -> NodeId {
        let id = self.push(NodeData::Comment { parent, text });
        self.children_mut(parent).push(id);
        id
    }

    pub fn append_processing_instruction(
        &mut self,
        parent: NodeId,
        target: String,
        value: String,
    ) -> NodeId {
        let id = self.push(NodeData::ProcessingInstruction {
            parent,
            target,
            value,
        });
        self.children_mut(parent).push(id);
        id
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id] {
            NodeData::Root { children } => children,
            NodeData::Element { children, .. } => children,
            _ => &[],
        }
    }

    fn children_mut(&mut self, id: NodeId) -> &mut Vec<NodeId> {
        match &mut self.nodes[id] {
            NodeData::Root { children } => children,
            NodeData::Element { children, .. } => children,
            _ => panic!("only the root and elements have children"),
        }
    }

    pub(crate) fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes[id] {
            NodeData::Root { .. } => None,
            NodeData::Element { parent, .. }
            | NodeData::Attribute { parent, .. }
            | NodeData::Namespace { parent, .. }
            | NodeData::Text { parent, .. }
            | NodeData::Comment { parent, .. }
            | NodeData::ProcessingInstruction { parent, .. } => Some(*parent),
        }
    }

    /// Assigns document-order indices with a depth-first pre-order walk:
    /// each element, then its attributes, then its namespace nodes, then its
    /// children in source order. Also (re)builds the `id()` lookup table.
    pub fn finalize(&mut self) {
        self.order = vec![usize::MAX; self.nodes.len()];
        self.order_index = Vec::with_capacity(self.nodes.len());
        self.ids = HashMap::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            self.order[id] = self.order_index.len();
            self.order_index.push(id);
            if let NodeData::Element {
                attributes,
                namespaces,
                children,
                ..
            } = &self.nodes[id]
            {
                // Visit order is attrs, namespaces, children; the stack is
                // LIFO so they are pushed reversed, children first.
                let visit: Vec<NodeId> = attributes
                    .iter()
                    .chain(namespaces.iter())
                    .chain(children.iter())
                    .copied()
                    .collect();
                stack.extend(visit.into_iter().rev());
                self.collect_id_attributes(id);
            } else {
                stack.extend(self.children(id).iter().rev().copied());
            }
        }
    }

    fn collect_id_attributes(&mut self, element: NodeId) {
        let NodeData::Element { attributes, .. } = &self.nodes[element] else {
            return;
        };
        let mut found = Vec::new();
        for &attr in attributes {
            if let NodeData::Attribute {
                prefix,
                uri,
                local,
                value,
                ..
            } = &self.nodes[attr]
            {
                let is_id = local == "id"
                    && (uri.is_none() || prefix.as_deref() == Some("xml"));
                if is_id {
                    found.push(value.clone());
                }
            }
        }
        for value in found {
            self.ids.entry(value).or_insert(element);
        }
    }

    /// Freezes the tree and returns the evaluation-facing document handle.
    pub fn into_document(mut self) -> Document {
        if self.order.len() != self.nodes.len() {
            self.finalize();
        }
        let tree = Rc::new(self);
        Document {
            root: NodeRef { tree, id: ROOT },
        }
    }
}

/// An immutable, shareable document: a finalized [`NodeTree`] behind `Rc`.
#[derive(Debug, Clone)]
pub struct Document {
    root: NodeRef,
}

impl Document {
    /// Builds the XPath node tree for an XML source (`build_tree`).
    pub fn parse(source: &str) -> Result<Document, XPathError> {
        Ok(NodeTree::parse(source)?.into_document())
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    /// The document-level prefix bindings collected while parsing.
    pub fn namespaces(&self) -> &HashMap<String, String> {
        &self.root.tree.namespaces
    }
}

/// A handle to one node of a [`NodeTree`].
#[derive(Clone)]
pub struct NodeRef {
    tree: Rc<NodeTree>,
    id: NodeId,
}

impl NodeRef {
    fn at(&self, id: NodeId) -> NodeRef {
        NodeRef {
            tree: Rc::clone(&self.tree),
            id,
        }
    }

    fn tree_addr(&self) -> usize {
        Rc::as_ptr(&self.tree) as usize
    }

    pub fn kind(&self) -> NodeKind {
        match &self.tree.nodes[self.id] {
            NodeData::Root { .. } => NodeKind::Root,
            NodeData::Element { .. } => NodeKind::Element,
            NodeData::Attribute { .. } => NodeKind::Attribute,
            NodeData::Namespace { .. } => NodeKind::Namespace,
            NodeData::Text { .. } => NodeKind::Text,
            NodeData::Comment { .. } => NodeKind::Comment,
            NodeData::ProcessingInstruction { .. } => NodeKind::ProcessingInstruction,
        }
    }

    /// The qualified name: `None` for root, text and comment nodes. A
    /// processing-instruction's name is its target; a namespace node's name
    /// is its prefix.
    pub fn name(&self) -> Option<QName<'_>> {
        match &self.tree.nodes[self.id] {
            NodeData::Element { prefix, local, .. }
            | NodeData::Attribute { prefix, local, .. } => Some(QName {
                prefix: prefix.as_deref(),
                local_part: local,
            }),
            NodeData::Namespace { prefix, .. } => Some(QName {
                prefix: None,
                local_part: prefix,
            }),
            NodeData::ProcessingInstruction { target, .. } => Some(QName {
                prefix: None,
                local_part: target,
            }),
            _ => None,
        }
    }

    /// The expanded name: (namespace URI or none, local part).
    pub fn expanded_name(&self) -> Option<(Option<&str>, &str)> {
        match &self.tree.nodes[self.id] {
            NodeData::Element { uri, local, .. } | NodeData::Attribute { uri, local, .. } => {
                Some((uri.as_deref(), local))
            }
            NodeData::Namespace { prefix, .. } => Some((None, prefix)),
            NodeData::ProcessingInstruction { target, .. } => Some((None, target)),
            _ => None,
        }
    }

    /// The string value as defined by the XPath 1.0 `string()` function.
    pub fn string_value(&self) -> String {
        match &self.tree.nodes[self.id] {
            NodeData::Root { .. } | NodeData::Element { .. } => {
                let mut out = String::new();
                collect_text(&self.tree, self.id, &mut out);
                out
            }
            NodeData::Attribute { value, .. } => value.clone(),
            NodeData::Namespace { uri, .. } => uri.clone(),
            NodeData::Text { text, .. } | NodeData::Comment { text, .. } => text.clone(),
            NodeData::ProcessingInstruction { value, .. } => value.clone(),
        }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.tree.parent_of(self.id).map(|id| self.at(id))
    }

    pub fn root(&self) -> NodeRef {
        self.at(self.tree.root_id())
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.tree.children(self.id).iter().map(|&id| self.at(id))
    }

    pub fn attributes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let ids: &[NodeId] = match &self.tree.nodes[self.id] {
            NodeData::Element { attributes, .. } => attributes,
            _ => &[],
        };
        ids.iter().map(|&id| self.at(id))
    }

    pub fn namespace_nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let ids: &[NodeId] = match &self.tree.nodes[self.id] {
            NodeData::Element { namespaces, .. } => namespaces,
            _ => &[],
        };
        ids.iter().map(|&id| self.at(id))
    }

    /// The value of the named un-namespaced attribute, if present.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        if let NodeData::Element { attributes, .. } = &self.tree.nodes[self.id] {
            for &attr in attributes {
                if let NodeData::Attribute {
                    uri: None,
                    local: name,
                    value,
                    ..
                } = &self.tree.nodes[attr]
                    && name == local
                {
                    return Some(value);
                }
            }
        }
        None
    }

    /// The position of this node in the document-order walk.
    pub fn document_order(&self) -> usize {
        self.tree.order[self.id]
    }

    /// Every node of the document strictly after this one in document order.
    pub(crate) fn nodes_after(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let start = self.document_order() + 1;
        self.tree.order_index[start.min(self.tree.order_index.len())..]
            .iter()
            .map(|&id| self.at(id))
    }

    /// Every node of the document strictly before this one, nearest first.
    pub(crate) fn nodes_before(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let end = self.document_order();
        self.tree.order_index[..end].iter().rev().map(|&id| self.at(id))
    }

    pub fn is_descendant_of(&self, ancestor: &NodeRef) -> bool {
        if !Rc::ptr_eq(&self.tree, &ancestor.tree) {
            return false;
        }
        let mut current = self.tree.parent_of(self.id);
        while let Some(id) = current {
            if id == ancestor.id {
                return true;
            }
            current = self.tree.parent_of(id);
        }
        false
    }

    /// Resolves an ID value against the document's `xml:id` / `id` table.
    pub fn element_by_id(&self, id: &str) -> Option<NodeRef> {
        self.tree.ids.get(id).map(|&node| self.at(node))
    }
}

fn collect_text(tree: &NodeTree, id: NodeId, out: &mut String) {
    for &child in tree.children(id) {
        match &tree.nodes[child] {
            NodeData::Text { text, .. } => out.push_str(text),
            NodeData::Element { .. } => collect_text(tree, child, out),
            _ => {}
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            NodeKind::Element => write!(
                f,
                "<{}>",
                self.name().map(|q| q.local_part.to_string()).unwrap_or_default()
            ),
            NodeKind::Attribute => write!(
                f,
                "@{}={:?}",
                self.name().map(|q| q.local_part.to_string()).unwrap_or_default(),
                self.string_value()
            ),
            kind => write!(f, "{:?}#{}", kind, self.id),
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.tree, &other.tree)
    }
}

impl Eq for NodeRef {}

impl PartialOrd for NodeRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeRef {
    /// Document order within a tree; nodes of different trees order by tree
    /// allocation address, which is total and stable for the evaluation.
    fn cmp(&self, other: &Self) -> Ordering {
        if Rc::ptr_eq(&self.tree, &other.tree) {
            self.tree.order[self.id].cmp(&other.tree.order[other.id])
        } else {
            self.tree_addr().cmp(&other.tree_addr())
        }
    }
}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tree_addr().hash(state);
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_navigate() {
        let doc = Document::parse("<root><para id=\"p1\">Hello</para><div/></root>").unwrap();
        let root = doc.root();
        assert_eq!(root.kind(), NodeKind::Root);

        let children: Vec<NodeRef> = root.children().collect();
        assert_eq!(children.len(), 1);
        let root_elem = &children[0];
        assert_eq!(root_elem.name().unwrap().local_part, "root");

        let elems: Vec<NodeRef> = root_elem.children().collect();
        assert_eq!(elems.len(), 2);
        assert_eq!(elems[0].string_value(), "Hello");
        assert_eq!(elems[0].attribute("id"), Some("p1"));
        assert_eq!(elems[1].name().unwrap().local_part, "div");
        assert_eq!(elems[0].parent(), Some(root_elem.clone()));
    }

    #[test]
    fn test_document_order_visits_attributes_then_children() {
        let doc = Document::parse("<a x=\"1\"><b/><c/></a>").unwrap();
        let a = doc.root().children().next().unwrap();
        let x = a.attributes().next().unwrap();
        let kids: Vec<NodeRef> = a.children().collect();
        let b = kids[0].clone();
        let c = kids[1].clone();

        assert!(doc.root().document_order() < a.document_order());
        assert!(a.document_order() < x.document_order());
        assert!(x.document_order() < b.document_order());
        assert!(b.document_order() < c.document_order());

        let mut sorted = vec![c.clone(), x.clone(), b.clone(), a.clone()];
        sorted.sort();
        assert_eq!(sorted, vec![a, x, b, c]);
    }

    #[test]
    fn test_text_merging_never_leaves_adjacent_text() {
        let mut tree = NodeTree::new();
        let root = tree.root_id();
        let elem = tree.append_element(root, None, None, "p".to_string());
        tree.append_text(elem, "one");
        tree.append_text(elem, " two");
        tree.append_text(elem, "");
        let doc = tree.into_document();
        let p = doc.root().children().next().unwrap();
        let texts: Vec<NodeRef> = p.children().collect();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].string_value(), "one two");
    }

    #[test]
    fn test_attributes_sorted_and_unique() {
        let mut tree = NodeTree::new();
        let root = tree.root_id();
        let elem = tree.append_element(root, None, None, "e".to_string());
        tree.append_attribute(elem, None, None, "zeta".into(), "1".into());
        tree.append_attribute(elem, None, None, "alpha".into(), "2".into());
        tree.append_attribute(elem, None, None, "zeta".into(), "3".into());
        let doc = tree.into_document();
        let e = doc.root().children().next().unwrap();
        let attrs: Vec<(String, String)> = e
            .attributes()
            .map(|a| (a.name().unwrap().local_part.to_string(), a.string_value()))
            .collect();
        assert_eq!(
            attrs,
            vec![
                ("alpha".to_string(), "2".to_string()),
                ("zeta".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn test_element_by_id() {
        let doc = Document::parse("<r><x id=\"a\"/><y id=\"b\"/><z id=\"a\"/></r>").unwrap();
        let root = doc.root();
        let x = root.element_by_id("a").unwrap();
        assert_eq!(x.name().unwrap().local_part, "x");
        assert_eq!(
            root.element_by_id("b").unwrap().name().unwrap().local_part,
            "y"
        );
        assert!(root.element_by_id("missing").is_none());
    }

    #[test]
    fn test_node_identity_not_content_equality() {
        let doc = Document::parse("<r><q/><q/></r>").unwrap();
        let r = doc.root().children().next().unwrap();
        let qs: Vec<NodeRef> = r.children().collect();
        assert_ne!(qs[0], qs[1]);
        assert_eq!(qs[0], qs[0].clone());
    }
}
