//! Whitespace stripping for the XSLT driver.
//!
//! Removes whitespace-only text nodes, honouring `xml:space="preserve"`
//! scopes and strip/preserve element lists.

use std::collections::HashSet;

use super::{NodeData, NodeId, NodeTree};

const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Default, Clone)]
pub struct StripPolicy {
    /// Strip under every element; otherwise only under elements in `strip`.
    strip_all: bool,
    /// Element names (local, or `*`) whose whitespace-only text is stripped.
    strip: HashSet<String>,
    /// Element names whose whitespace is preserved even when listed above.
    preserve: HashSet<String>,
    /// Expanded element names whose subtrees are never touched.
    keep_subtrees: Vec<(Option<String>, String)>,
}

impl StripPolicy {
    /// Strip everywhere; used for stylesheet trees.
    pub fn all() -> Self {
        StripPolicy {
            strip_all: true,
            ..Default::default()
        }
    }

    /// Strip only under the listed element names; used for
    /// `xsl:strip-space` / `xsl:preserve-space` on data trees.
    pub fn listed(
        strip: impl IntoIterator<Item = String>,
        preserve: impl IntoIterator<Item = String>,
    ) -> Self {
        StripPolicy {
            strip_all: false,
            strip: strip.into_iter().collect(),
            preserve: preserve.into_iter().collect(),
            keep_subtrees: Vec::new(),
        }
    }

    /// Leaves the subtree of every element with this expanded name intact
    /// (e.g. `xsl:text`).
    pub fn keep_subtree(mut self, uri: Option<String>, local: String) -> Self {
        self.keep_subtrees.push((uri, local));
        self
    }

    fn applies_to(&self, local: &str) -> bool {
        if self.preserve.contains(local) {
            return false;
        }
        self.strip_all || self.strip.contains(local) || self.strip.contains("*")
    }
}

/// Removes whitespace-only text nodes per the policy and re-finalizes the
/// tree's document-order index.
pub fn strip_whitespace(tree: &mut NodeTree, policy: &StripPolicy) {
    let mut doomed = HashSet::new();
    collect(tree, tree.root_id(), false, policy, &mut doomed);
    if doomed.is_empty() {
        return;
    }
    for id in 0..tree.nodes.len() {
        match &mut tree.nodes[id] {
            NodeData::Root { children } | NodeData::Element { children, .. } => {
                children.retain(|c| !doomed.contains(c));
            }
            _ => {}
        }
    }
    tree.finalize();
}

fn collect(
    tree: &NodeTree,
    id: NodeId,
    preserve_space: bool,
    policy: &StripPolicy,
    doomed: &mut HashSet<NodeId>,
) {
    let local = match &tree.nodes[id] {
        NodeData::Element { local, .. } => Some(local.clone()),
        NodeData::Root { .. } => None,
        _ => return,
    };
    let strippable = match &local {
        Some(name) => policy.applies_to(name),
        // Whitespace between top-level constructs never survives parsing,
        // but a synthetic fragment root may carry some.
        None => policy.strip_all,
    };

    for &child in tree.children(id) {
        match &tree.nodes[child] {
            NodeData::Text { text, .. } => {
                let blank = text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
                if blank && strippable && !preserve_space {
                    doomed.insert(child);
                }
            }
            NodeData::Element { uri, local, .. } => {
                if policy
                    .keep_subtrees
                    .iter()
                    .any(|(ku, kl)| ku.as_deref() == uri.as_deref() && kl == local)
                {
                    continue;
                }
                let child_preserve = match space_attribute(tree, child) {
                    Some("preserve") => true,
                    Some("default") => false,
                    _ => preserve_space,
                };
                collect(tree, child, child_preserve, policy, doomed);
            }
            _ => {}
        }
    }
}

fn space_attribute(tree: &NodeTree, element: NodeId) -> Option<&str> {
    if let NodeData::Element { attributes, .. } = &tree.nodes[element] {
        for &attr in attributes {
            if let NodeData::Attribute { uri, local, value, .. } = &tree.nodes[attr]
                && uri.as_deref() == Some(XML_URI)
                && local == "space"
            {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, NodeTree};

    fn kinds_under_first_child(tree: NodeTree) -> Vec<NodeKind> {
        let doc = tree.into_document();
        let first = doc.root().children().next().unwrap();
        first.children().map(|c| c.kind()).collect()
    }

    #[test]
    fn test_strip_all_removes_blank_runs_only() {
        let mut tree = NodeTree::parse("<r>\n  <a/>\n  keep\n  <b/>\n</r>").unwrap();
        strip_whitespace(&mut tree, &StripPolicy::all());
        assert_eq!(
            kinds_under_first_child(tree),
            vec![NodeKind::Element, NodeKind::Text, NodeKind::Element]
        );
    }

    #[test]
    fn test_xml_space_preserve_scopes() {
        let mut tree = NodeTree::parse(
            "<r><pre xml:space=\"preserve\"> <i/> </pre><plain> <i/> </plain></r>",
        )
        .unwrap();
        strip_whitespace(&mut tree, &StripPolicy::all());
        let doc = tree.into_document();
        let r = doc.root().children().next().unwrap();
        let children: Vec<_> = r.children().collect();
        assert_eq!(children[0].children().count(), 3);
        assert_eq!(children[1].children().count(), 1);
    }

    #[test]
    fn test_listed_strip_with_preserve_override() {
        let mut tree =
            NodeTree::parse("<r><s> <i/> </s><p> <i/> </p></r>").unwrap();
        strip_whitespace(
            &mut tree,
            &StripPolicy::listed(
                vec!["s".to_string(), "p".to_string()],
                vec!["p".to_string()],
            ),
        );
        let doc = tree.into_document();
        let r = doc.root().children().next().unwrap();
        let children: Vec<_> = r.children().collect();
        assert_eq!(children[0].children().count(), 1);
        assert_eq!(children[1].children().count(), 3);
    }

    #[test]
    fn test_kept_subtrees_untouched() {
        let mut tree = NodeTree::parse("<r><t> </t><u> </u></r>").unwrap();
        strip_whitespace(
            &mut tree,
            &StripPolicy::all().keep_subtree(None, "t".to_string()),
        );
        let doc = tree.into_document();
        let r = doc.root().children().next().unwrap();
        let children: Vec<_> = r.children().collect();
        assert_eq!(children[0].children().count(), 1);
        assert_eq!(children[1].children().count(), 0);
    }
}
