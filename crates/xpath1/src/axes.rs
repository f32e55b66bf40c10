//! Pure functions collecting the nodes along each XPath axis.
//!
//! Forward axes yield document order, reverse axes yield reverse document
//! order; positional predicates count in exactly the order produced here.

use crate::ast::Axis;
use crate::tree::{NodeKind, NodeRef};

pub fn collect(axis: Axis, node: &NodeRef) -> Vec<NodeRef> {
    let mut results = Vec::new();
    match axis {
        Axis::SelfAxis => collect_self(node, &mut results),
        Axis::Child => collect_child(node, &mut results),
        Axis::Parent => collect_parent(node, &mut results),
        Axis::Descendant => collect_descendant(node, &mut results),
        Axis::DescendantOrSelf => collect_descendant_or_self(node, &mut results),
        Axis::Ancestor => collect_ancestor(node, &mut results),
        Axis::AncestorOrSelf => collect_ancestor_or_self(node, &mut results),
        Axis::FollowingSibling => collect_following_sibling(node, &mut results),
        Axis::PrecedingSibling => collect_preceding_sibling(node, &mut results),
        Axis::Following => collect_following(node, &mut results),
        Axis::Preceding => collect_preceding(node, &mut results),
        Axis::Attribute => collect_attribute(node, &mut results),
        Axis::Namespace => collect_namespace(node, &mut results),
    }
    results
}

pub fn collect_self(node: &NodeRef, results: &mut Vec<NodeRef>) {
    results.push(node.clone());
}

pub fn collect_child(node: &NodeRef, results: &mut Vec<NodeRef>) {
    results.extend(node.children());
}

pub fn collect_attribute(node: &NodeRef, results: &mut Vec<NodeRef>) {
    results.extend(node.attributes());
}

pub fn collect_namespace(node: &NodeRef, results: &mut Vec<NodeRef>) {
    results.extend(node.namespace_nodes());
}

pub fn collect_parent(node: &NodeRef, results: &mut Vec<NodeRef>) {
    if let Some(parent) = node.parent() {
        results.push(parent);
    }
}

pub fn collect_descendant(node: &NodeRef, results: &mut Vec<NodeRef>) {
    for child in node.children() {
        results.push(child.clone());
        collect_descendant(&child, results);
    }
}

pub fn collect_descendant_or_self(node: &NodeRef, results: &mut Vec<NodeRef>) {
    results.push(node.clone());
    collect_descendant(node, results);
}

pub fn collect_ancestor(node: &NodeRef, results: &mut Vec<NodeRef>) {
    let mut current = node.parent();
    while let Some(parent) = current {
        current = parent.parent();
        results.push(parent);
    }
}

pub fn collect_ancestor_or_self(node: &NodeRef, results: &mut Vec<NodeRef>) {
    results.push(node.clone());
    collect_ancestor(node, results);
}

pub fn collect_following_sibling(node: &NodeRef, results: &mut Vec<NodeRef>) {
    // Attribute and namespace nodes are not children of their parent, so
    // the scan never finds them and they correctly have no siblings.
    if let Some(parent) = node.parent() {
        let mut found_self = false;
        for sibling in parent.children() {
            if found_self {
                results.push(sibling);
            } else if sibling == *node {
                found_self = true;
            }
        }
    }
}

pub fn collect_preceding_sibling(node: &NodeRef, results: &mut Vec<NodeRef>) {
    if let Some(parent) = node.parent() {
        let mut before = Vec::new();
        for sibling in parent.children() {
            if sibling == *node {
                before.reverse();
                results.append(&mut before);
                return;
            }
            before.push(sibling);
        }
    }
}

/// All nodes after the context node in document order, excluding its own
/// subtree (attribute and namespace nodes hang off their element but are
/// not part of any subtree).
pub fn collect_following(node: &NodeRef, results: &mut Vec<NodeRef>) {
    for candidate in node.nodes_after() {
        let in_subtree = !matches!(
            candidate.kind(),
            NodeKind::Attribute | NodeKind::Namespace
        ) && candidate.is_descendant_of(node);
        if !in_subtree {
            results.push(candidate);
        }
    }
}

/// All nodes before the context node in reverse document order, excluding
/// its ancestors.
pub fn collect_preceding(node: &NodeRef, results: &mut Vec<NodeRef>) {
    for candidate in node.nodes_before() {
        if !node.is_descendant_of(&candidate) {
            results.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Document;

    const DOC: &str = "<root><para id=\"p1\">Hello</para><!-- note --><div/><?pi data?><para>World</para></root>";

    fn names(nodes: &[NodeRef]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| {
                n.name()
                    .map(|q| q.local_part.to_string())
                    .unwrap_or_else(|| format!("{:?}", n.kind()))
            })
            .collect()
    }

    #[test]
    fn test_child_preserves_source_order() {
        let doc = Document::parse(DOC).unwrap();
        let root_elem = doc.root().children().next().unwrap();
        let children = collect(Axis::Child, &root_elem);
        assert_eq!(
            names(&children),
            vec!["para", "Comment", "div", "pi", "para"]
        );
    }

    #[test]
    fn test_ancestor_walks_outward() {
        let doc = Document::parse(DOC).unwrap();
        let root_elem = doc.root().children().next().unwrap();
        let para = root_elem.children().next().unwrap();
        let text = para.children().next().unwrap();

        let ancestors = collect(Axis::Ancestor, &text);
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[0], para);
        assert_eq!(ancestors[1], root_elem);
        assert_eq!(ancestors[2], doc.root());

        let or_self = collect(Axis::AncestorOrSelf, &text);
        assert_eq!(or_self.len(), 4);
        assert_eq!(or_self[0], text);
    }

    #[test]
    fn test_descendant_is_preorder() {
        let doc = Document::parse("<a><b><c/></b><d/></a>").unwrap();
        let a = doc.root().children().next().unwrap();
        let descendants = collect(Axis::Descendant, &a);
        assert_eq!(names(&descendants), vec!["b", "c", "d"]);
        let orders: Vec<usize> = descendants.iter().map(|n| n.document_order()).collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sibling_axes() {
        let doc = Document::parse(DOC).unwrap();
        let root_elem = doc.root().children().next().unwrap();
        let children: Vec<NodeRef> = root_elem.children().collect();
        let div = children[2].clone();

        let following = collect(Axis::FollowingSibling, &div);
        assert_eq!(names(&following), vec!["pi", "para"]);

        let preceding = collect(Axis::PrecedingSibling, &div);
        assert_eq!(names(&preceding), vec!["Comment", "para"]);

        // Attributes have no siblings.
        let attr = children[0].attributes().next().unwrap();
        assert!(collect(Axis::FollowingSibling, &attr).is_empty());
        assert!(collect(Axis::PrecedingSibling, &attr).is_empty());
    }

    #[test]
    fn test_following_excludes_subtree_preceding_excludes_ancestors() {
        let doc = Document::parse("<a><b><c/></b><d><e/></d></a>").unwrap();
        let a = doc.root().children().next().unwrap();
        let b = a.children().next().unwrap();

        let following = collect(Axis::Following, &b);
        // c is inside b's subtree; d and e follow.
        assert!(names(&following).iter().all(|n| n != "c"));
        assert!(names(&following).contains(&"d".to_string()));
        assert!(names(&following).contains(&"e".to_string()));

        let d = collect(Axis::FollowingSibling, &b)[0].clone();
        let preceding = collect(Axis::Preceding, &d);
        assert!(names(&preceding).contains(&"b".to_string()));
        assert!(names(&preceding).contains(&"c".to_string()));
        assert!(names(&preceding).iter().all(|n| n != "a"));
        // Reverse document order: nearest node first.
        let orders: Vec<usize> = preceding.iter().map(|n| n.document_order()).collect();
        assert!(orders.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_axis_partition_of_the_document() {
        let doc = Document::parse("<a><b x=\"1\"><c/></b><d/></a>").unwrap();
        let a = doc.root().children().next().unwrap();
        let b = a.children().next().unwrap();

        let mut union = Vec::new();
        for axis in [
            Axis::AncestorOrSelf,
            Axis::DescendantOrSelf,
            Axis::Preceding,
            Axis::Following,
        ] {
            let part = collect(axis, &b);
            for node in &part {
                assert!(!union.contains(node), "axes must be disjoint");
            }
            union.extend(part);
        }
        // Every node of the tree lands in exactly one of the four sets.
        let total = doc.root().nodes_after().count() + 1;
        assert_eq!(union.len(), total);
    }
}
