//! Event-driven construction of a [`NodeTree`] from an XML byte stream.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::events::attributes::Attribute;
use quick_xml::name::{PrefixDeclaration, QName, ResolveResult};
use quick_xml::reader::NsReader;

use super::{NodeId, NodeTree};
use crate::error::XPathError;

const XML_PREFIX: &str = "xml";
const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Consumes an XML source and materialises the XPath node tree.
///
/// Fails with [`XPathError::MalformedXml`] on tokenisation errors and with
/// [`XPathError::RedefinedNamespacePrefix`] if a prefix is bound to
/// conflicting URIs in overlapping scopes: twice on one element, or on an
/// element while an enclosing binding of the same prefix to a different
/// URI is still in scope. Sibling subtrees may freely reuse a prefix.
pub fn parse_tree(source: &str) -> Result<NodeTree, XPathError> {
    let mut reader = NsReader::from_str(source);
    let mut tree = NodeTree::new();
    // Stack of open elements; index 0 is the root node.
    let mut open: Vec<NodeId> = vec![tree.root_id()];
    // One namespace scope per open element.
    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                open_element(&mut tree, &reader, &mut open, &mut scopes, &start)?;
            }
            Event::Empty(empty) => {
                open_element(&mut tree, &reader, &mut open, &mut scopes, &empty)?;
                open.pop();
                scopes.pop();
            }
            Event::End(_) => {
                if open.len() <= 1 {
                    return Err(XPathError::MalformedXml(
                        "unmatched end tag".to_string(),
                    ));
                }
                open.pop();
                scopes.pop();
            }
            Event::Text(text) => {
                let parent = *open.last().expect("root never closes");
                if parent != tree.root_id() {
                    tree.append_text(parent, &text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(cdata) => {
                let parent = *open.last().expect("root never closes");
                if parent != tree.root_id() {
                    let text = std::str::from_utf8(cdata.as_ref())
                        .map_err(|e| XPathError::MalformedXml(e.to_string()))?;
                    tree.append_text(parent, text);
                }
            }
            Event::Comment(comment) => {
                let parent = *open.last().expect("root never closes");
                tree.append_comment(parent, comment.unescape().map_err(malformed)?.into_owned());
            }
            Event::PI(pi) => {
                let parent = *open.last().expect("root never closes");
                let target = std::str::from_utf8(pi.target())
                    .map_err(|e| XPathError::MalformedXml(e.to_string()))?
                    .to_string();
                let value = std::str::from_utf8(pi.content())
                    .map_err(|e| XPathError::MalformedXml(e.to_string()))?
                    .trim_start()
                    .to_string();
                tree.append_processing_instruction(parent, target, value);
            }
            Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
            _ => {}
        }
    }

    if open.len() != 1 {
        return Err(XPathError::MalformedXml(
            "unexpected end of document inside an element".to_string(),
        ));
    }
    if !tree
        .children(tree.root_id())
        .iter()
        .any(|&c| matches!(tree.nodes[c], super::NodeData::Element { .. }))
    {
        return Err(XPathError::MalformedXml(
            "document has no root element".to_string(),
        ));
    }

    tree.finalize();
    Ok(tree)
}

fn open_element(
    tree: &mut NodeTree,
    reader: &NsReader<&[u8]>,
    open: &mut Vec<NodeId>,
    scopes: &mut Vec<Vec<(String, String)>>,
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<(), XPathError> {
    let parent = *open.last().expect("root never closes");
    if parent == tree.root_id()
        && tree
            .children(parent)
            .iter()
            .any(|&c| matches!(tree.nodes[c], super::NodeData::Element { .. }))
    {
        return Err(XPathError::MalformedXml(
            "multiple document elements".to_string(),
        ));
    }

    // Split namespace declarations from ordinary attributes before the new
    // scope is pushed, so declarations on this element apply to its own name
    // and attributes (quick-xml resolves both against its internal stack).
    let mut declared: Vec<(String, String)> = Vec::new();
    let mut plain: Vec<Attribute> = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| XPathError::MalformedXml(e.to_string()))?;
        let value = attribute
            .decode_and_unescape_value(reader.decoder())
            .map_err(malformed)?
            .into_owned();
        if let Some(declaration) = attribute.key.as_namespace_binding() {
            let prefix = match declaration {
                PrefixDeclaration::Default => String::new(),
                PrefixDeclaration::Named(name) => decode(name)?,
            };
            // Same scope, conflicting URIs: the same element declaring the
            // prefix twice.
            if let Some((_, earlier)) = declared.iter().find(|(p, _)| *p == prefix) {
                if *earlier != value {
                    return Err(XPathError::RedefinedNamespacePrefix(prefix));
                }
                continue;
            }
            // Overlapping scope: an enclosing binding of this prefix, still
            // live on the ancestor chain, to a different URI. Closed sibling
            // scopes have been popped and never conflict.
            if !value.is_empty()
                && let Some((_, enclosing)) = scopes
                    .iter()
                    .rev()
                    .flat_map(|scope| scope.iter())
                    .find(|(p, _)| *p == prefix)
                && !enclosing.is_empty()
                && *enclosing != value
            {
                return Err(XPathError::RedefinedNamespacePrefix(prefix));
            }
            if !value.is_empty() {
                tree.declare_namespace(&prefix, &value);
            }
            declared.push((prefix, value));
        } else {
            plain.push(attribute);
        }
    }
    scopes.push(declared);

    let (prefix, uri, local) = name_parts(reader.resolve_element(start.name()), start.name())?;
    let element = tree.append_element(parent, prefix, uri, local);

    for attribute in plain {
        let (prefix, uri, local) =
            name_parts(reader.resolve_attribute(attribute.key), attribute.key)?;
        let value = attribute
            .decode_and_unescape_value(reader.decoder())
            .map_err(malformed)?
            .into_owned();
        tree.append_attribute(element, prefix, uri, local, value);
    }

    // Materialise one namespace node per in-scope binding, sorted by prefix
    // for deterministic document order; `xml` is always in scope.
    let mut in_scope: BTreeMap<String, String> = BTreeMap::new();
    in_scope.insert(XML_PREFIX.to_string(), XML_URI.to_string());
    for scope in scopes.iter() {
        for (prefix, uri) in scope {
            if uri.is_empty() {
                in_scope.remove(prefix);
            } else {
                in_scope.insert(prefix.clone(), uri.clone());
            }
        }
    }
    for (prefix, uri) in in_scope {
        tree.append_namespace(element, prefix, uri);
    }

    open.push(element);
    Ok(())
}

fn name_parts(
    resolution: (ResolveResult<'_>, quick_xml::name::LocalName<'_>),
    qname: QName<'_>,
) -> Result<(Option<String>, Option<String>, String), XPathError> {
    let (resolved, local_name) = resolution;
    let uri = match resolved {
        ResolveResult::Bound(ns) => Some(decode(ns.into_inner())?),
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(p) => {
            return Err(XPathError::MalformedXml(format!(
                "unbound namespace prefix '{}'",
                String::from_utf8_lossy(&p)
            )));
        }
    };
    let prefix = match qname.prefix() {
        Some(p) => Some(decode(p.into_inner())?),
        None => None,
    };
    Ok((prefix, uri, decode(local_name.into_inner())?))
}

fn decode(bytes: &[u8]) -> Result<String, XPathError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| XPathError::MalformedXml(e.to_string()))
}

fn malformed(e: impl std::fmt::Display) -> XPathError {
    XPathError::MalformedXml(e.to_string())
}

#[cfg(test)]
mod tests {
    use crate::tree::{Document, NodeKind, NodeRef};

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(Document::parse("<a><b></a>").is_err());
        assert!(Document::parse("<a>").is_err());
        assert!(Document::parse("").is_err());
    }

    #[test]
    fn test_namespaces_resolved_on_names() {
        let doc = Document::parse(
            "<x:r xmlns:x=\"urn:one\"><x:item x:flag=\"y\"/></x:r>",
        )
        .unwrap();
        let r = doc.root().children().next().unwrap();
        assert_eq!(r.expanded_name(), Some((Some("urn:one"), "r")));
        assert_eq!(r.name().unwrap().prefix, Some("x"));
        let item = r.children().next().unwrap();
        let flag = item.attributes().next().unwrap();
        assert_eq!(flag.expanded_name(), Some((Some("urn:one"), "flag")));
        assert_eq!(doc.namespaces().get("x").map(String::as_str), Some("urn:one"));
    }

    #[test]
    fn test_namespace_nodes_materialised_in_scope() {
        let doc = Document::parse(
            "<r xmlns=\"urn:d\" xmlns:a=\"urn:a\"><inner/></r>",
        )
        .unwrap();
        let r = doc.root().children().next().unwrap();
        let ns: Vec<(String, String)> = r
            .namespace_nodes()
            .map(|n| (n.name().unwrap().local_part.to_string(), n.string_value()))
            .collect();
        assert_eq!(
            ns,
            vec![
                ("".to_string(), "urn:d".to_string()),
                ("a".to_string(), "urn:a".to_string()),
                ("xml".to_string(), "http://www.w3.org/XML/1998/namespace".to_string()),
            ]
        );
        // Inherited bindings reappear on descendants.
        let inner = r.children().next().unwrap();
        assert_eq!(inner.namespace_nodes().count(), 3);
    }

    #[test]
    fn test_conflicting_declaration_on_one_element() {
        let err = Document::parse("<r xmlns:a=\"urn:1\" xmlns:a=\"urn:2\"/>");
        assert!(err.is_err());
    }

    #[test]
    fn test_conflicting_rebinding_in_overlapping_scope() {
        use crate::error::XPathError;
        // The enclosing binding of `a` is still in scope at <c>.
        let err = Document::parse("<r xmlns:a=\"urn:1\"><c xmlns:a=\"urn:2\"/></r>");
        assert!(matches!(err, Err(XPathError::RedefinedNamespacePrefix(p)) if p == "a"));
        // Re-declaring the same URI is allowed.
        assert!(Document::parse("<r xmlns:a=\"urn:1\"><c xmlns:a=\"urn:1\"/></r>").is_ok());
    }

    #[test]
    fn test_sibling_scopes_may_reuse_a_prefix() {
        // The scopes of <a> and <b> never overlap, so rebinding `p` is fine.
        let doc = Document::parse(
            "<r><a xmlns:p=\"urn:1\"><p:x/></a><b xmlns:p=\"urn:2\"><p:y/></b></r>",
        )
        .unwrap();
        let r = doc.root().children().next().unwrap();
        let children: Vec<NodeRef> = r.children().collect();
        let x = children[0].children().next().unwrap();
        let y = children[1].children().next().unwrap();
        assert_eq!(x.expanded_name(), Some((Some("urn:1"), "x")));
        assert_eq!(y.expanded_name(), Some((Some("urn:2"), "y")));
        // An undeclared default namespace may also be rebound afterwards.
        assert!(Document::parse(
            "<r xmlns=\"urn:d\"><a xmlns=\"\"><b xmlns=\"urn:e\"/></a></r>"
        )
        .is_ok());
    }

    #[test]
    fn test_comments_and_pis_split_text_runs() {
        let doc = Document::parse("<r>one<!-- note -->two<?go now?></r>").unwrap();
        let r = doc.root().children().next().unwrap();
        let kinds: Vec<NodeKind> = r.children().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Text,
                NodeKind::Comment,
                NodeKind::Text,
                NodeKind::ProcessingInstruction
            ]
        );
        let children: Vec<NodeRef> = r.children().collect();
        assert_eq!(children[1].string_value(), " note ");
        assert_eq!(children[3].name().unwrap().local_part, "go");
        assert_eq!(children[3].string_value(), "now");
        assert_eq!(r.string_value(), "onetwo");
    }

    #[test]
    fn test_entity_references_unescaped() {
        let doc = Document::parse("<r a=\"&lt;x&gt;\">&amp;<![CDATA[<raw>]]></r>").unwrap();
        let r = doc.root().children().next().unwrap();
        assert_eq!(r.attributes().next().unwrap().string_value(), "<x>");
        assert_eq!(r.string_value(), "&<raw>");
    }
}
