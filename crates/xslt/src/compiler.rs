//! Compiles a stylesheet document into the template set.
//!
//! The stylesheet is read through the engine's own node tree (whitespace
//! stripped per the XSLT rules), and every `match`, `select` and `test`
//! attribute is compiled to an XPath AST up front.

use std::collections::HashMap;

use log::debug;
use xylem_xpath1::{
    Document, Expression, NodeKind, NodeRef, NodeTree, StripPolicy, parse_expression,
    strip_whitespace,
};

use crate::ast::{
    Avt, AvtPart, Binding, CompiledStylesheet, Instruction, MatchRule, Template,
    TopLevelBinding, When, XSL_NS,
};
use crate::error::XsltError;
use crate::pattern;

/// The built-in template rules: elements and the root recurse, text and
/// attributes emit their string value.
const DEFAULT_STYLESHEET: &str = r#"<?xml version="1.0"?>
<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
<xsl:template match="*|/"><xsl:apply-templates/></xsl:template>
<xsl:template match="text()|@*"><xsl:value-of select="."/></xsl:template>
</xsl:stylesheet>"#;

pub fn compile(source: &str) -> Result<CompiledStylesheet, XsltError> {
    let doc = parse_stylesheet(source)?;
    let mut sheet = CompiledStylesheet {
        templates: Vec::new(),
        match_rules: Vec::new(),
        built_in_rules: Vec::new(),
        named: HashMap::new(),
        top_level: Vec::new(),
        strip_space: Vec::new(),
        preserve_space: Vec::new(),
        output_indent: false,
        namespaces: doc.namespaces().clone(),
    };
    compile_into(&doc, &mut sheet, false)?;
    let defaults =
        parse_stylesheet(DEFAULT_STYLESHEET).expect("the built-in stylesheet is well-formed");
    compile_into(&defaults, &mut sheet, true)?;
    Ok(sheet)
}

/// Parses and whitespace-strips a stylesheet document; `xsl:text` content
/// and `xml:space="preserve"` scopes survive untouched.
fn parse_stylesheet(source: &str) -> Result<Document, XsltError> {
    let mut tree = NodeTree::parse(source)?;
    strip_whitespace(
        &mut tree,
        &StripPolicy::all().keep_subtree(Some(XSL_NS.to_string()), "text".to_string()),
    );
    Ok(tree.into_document())
}

fn compile_into(
    doc: &Document,
    sheet: &mut CompiledStylesheet,
    built_in: bool,
) -> Result<(), XsltError> {
    let stylesheet_element = doc
        .root()
        .children()
        .find(|n| n.kind() == NodeKind::Element)
        .ok_or_else(|| XsltError::Compile("empty stylesheet".to_string()))?;
    match xsl_local(&stylesheet_element) {
        Some("stylesheet") | Some("transform") => {}
        _ => {
            return Err(XsltError::Compile(
                "expected an xsl:stylesheet document element".to_string(),
            ));
        }
    }

    for child in stylesheet_element.children() {
        if child.kind() != NodeKind::Element {
            continue;
        }
        match xsl_local(&child) {
            Some("template") => compile_template(&child, sheet, built_in)?,
            Some("variable") | Some("param") if !built_in => {
                sheet.top_level.push(TopLevelBinding {
                    name: required_attr(&child, "name")?,
                    binding: binding_of(&child)?,
                    is_param: xsl_local(&child) == Some("param"),
                });
            }
            Some("strip-space") if !built_in => {
                sheet
                    .strip_space
                    .extend(required_attr(&child, "elements")?.split_whitespace().map(str::to_string));
            }
            Some("preserve-space") if !built_in => {
                sheet
                    .preserve_space
                    .extend(required_attr(&child, "elements")?.split_whitespace().map(str::to_string));
            }
            Some("output") if !built_in => {
                sheet.output_indent = child.attribute("indent") == Some("yes");
            }
            Some("import") | Some("include") => {
                return Err(XsltError::UnsupportedFeature(format!(
                    "xsl:{}",
                    xsl_local(&child).unwrap_or_default()
                )));
            }
            Some(other) => {
                // xsl:key and friends only matter to function stubs that
                // already fail as unsupported when called.
                debug!("ignoring top-level xsl:{}", other);
            }
            None => {}
        }
    }
    Ok(())
}

fn compile_template(
    node: &NodeRef,
    sheet: &mut CompiledStylesheet,
    built_in: bool,
) -> Result<(), XsltError> {
    let index = sheet.templates.len();
    let name = non_empty_attr(node, "name");
    let mode = non_empty_attr(node, "mode");
    let explicit_priority = match node.attribute("priority") {
        Some(text) => Some(text.trim().parse::<f64>().map_err(|_| {
            XsltError::Compile(format!("invalid template priority '{}'", text))
        })?),
        None => None,
    };

    if let Some(match_text) = non_empty_attr(node, "match") {
        let compiled = pattern::parse(&match_text)?;
        let rules = if built_in {
            &mut sheet.built_in_rules
        } else {
            &mut sheet.match_rules
        };
        for alternative in compiled.alternatives {
            rules.push(MatchRule {
                pattern: alternative.expr,
                priority: explicit_priority.unwrap_or(alternative.default_priority),
                template: index,
                text: alternative.text,
            });
        }
    } else if name.is_none() {
        return Err(XsltError::Compile(
            "xsl:template needs a match pattern or a name".to_string(),
        ));
    }

    if let Some(template_name) = &name {
        sheet.named.entry(template_name.clone()).or_insert(index);
    }

    sheet.templates.push(Template {
        name,
        mode,
        built_in,
        body: compile_body(node)?,
    });
    Ok(())
}

fn compile_body(parent: &NodeRef) -> Result<Vec<Instruction>, XsltError> {
    let mut body = Vec::new();
    for child in parent.children() {
        match child.kind() {
            NodeKind::Text => body.push(Instruction::Text(child.string_value())),
            NodeKind::Element => body.push(compile_element(&child)?),
            _ => {}
        }
    }
    Ok(body)
}

fn compile_element(node: &NodeRef) -> Result<Instruction, XsltError> {
    let Some(local) = xsl_local(node) else {
        // A literal result element; its attributes are value templates.
        let mut attributes = Vec::new();
        for attr in node.attributes() {
            attributes.push((qualified_name(&attr), parse_avt(&attr.string_value())?));
        }
        return Ok(Instruction::LiteralElement {
            name: qualified_name(node),
            attributes,
            body: compile_body(node)?,
        });
    };

    Ok(match local {
        "apply-templates" => {
            if node.children().any(|c| c.kind() == NodeKind::Element) {
                // xsl:sort / xsl:with-param under apply-templates.
                Instruction::Unsupported("xsl:apply-templates with element content".to_string())
            } else {
                Instruction::ApplyTemplates {
                    select: optional_expr(node, "select")?,
                    mode: non_empty_attr(node, "mode"),
                }
            }
        }
        "call-template" => {
            let mut params = Vec::new();
            for child in node.children() {
                if child.kind() != NodeKind::Element {
                    continue;
                }
                if xsl_local(&child) != Some("with-param") {
                    return Err(XsltError::Compile(
                        "xsl:call-template allows only xsl:with-param children".to_string(),
                    ));
                }
                params.push((required_attr(&child, "name")?, binding_of(&child)?));
            }
            Instruction::CallTemplate {
                name: required_attr(node, "name")?,
                params,
            }
        }
        "for-each" => {
            if node
                .children()
                .any(|c| xsl_local(&c) == Some("sort"))
            {
                Instruction::Unsupported("xsl:sort".to_string())
            } else {
                Instruction::ForEach {
                    select: required_expr(node, "select")?,
                    body: compile_body(node)?,
                }
            }
        }
        "value-of" => Instruction::ValueOf {
            select: required_expr(node, "select")?,
        },
        "variable" => Instruction::Variable {
            name: required_attr(node, "name")?,
            binding: binding_of(node)?,
        },
        "param" => Instruction::Param {
            name: required_attr(node, "name")?,
            binding: binding_of(node)?,
        },
        "copy-of" => Instruction::CopyOf {
            select: required_expr(node, "select")?,
        },
        "element" => Instruction::Element {
            name: parse_avt(&required_attr(node, "name")?)?,
            body: compile_body(node)?,
        },
        "choose" => {
            let mut whens = Vec::new();
            let mut otherwise = None;
            for child in node.children() {
                if child.kind() != NodeKind::Element {
                    continue;
                }
                match xsl_local(&child) {
                    Some("when") => whens.push(When {
                        test: required_expr(&child, "test")?,
                        body: compile_body(&child)?,
                    }),
                    Some("otherwise") if otherwise.is_none() => {
                        otherwise = Some(compile_body(&child)?);
                    }
                    _ => {
                        return Err(XsltError::Compile(
                            "xsl:choose allows only xsl:when and xsl:otherwise".to_string(),
                        ));
                    }
                }
            }
            Instruction::Choose { whens, otherwise }
        }
        "if" => Instruction::If {
            test: required_expr(node, "test")?,
            body: compile_body(node)?,
        },
        "text" => Instruction::Text(node.string_value()),
        other => Instruction::Unsupported(format!("xsl:{}", other)),
    })
}

/// How a variable-like element obtains its value: a `select` expression,
/// body content (a result-tree fragment), or the empty string.
fn binding_of(node: &NodeRef) -> Result<Binding, XsltError> {
    if let Some(select) = non_empty_attr(node, "select") {
        return Ok(Binding::Select(parse_expression(&select)?));
    }
    let body = compile_body(node)?;
    if body.is_empty() {
        Ok(Binding::Empty)
    } else {
        Ok(Binding::Content(body))
    }
}

/// Splits an attribute value template into literal runs and `{expr}`
/// substitutions; `{{` and `}}` escape the braces.
pub fn parse_avt(text: &str) -> Result<Avt, XsltError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                let mut expr_text = String::new();
                let mut quote: Option<char> = None;
                loop {
                    let Some(c) = chars.next() else {
                        return Err(XsltError::Compile(format!(
                            "unterminated expression in value template '{}'",
                            text
                        )));
                    };
                    match quote {
                        Some(q) if c == q => {
                            quote = None;
                            expr_text.push(c);
                        }
                        Some(_) => expr_text.push(c),
                        None if c == '\'' || c == '"' => {
                            quote = Some(c);
                            expr_text.push(c);
                        }
                        None if c == '}' => break,
                        None => expr_text.push(c),
                    }
                }
                parts.push(AvtPart::Expr(parse_expression(&expr_text)?));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(Avt { parts })
}

fn xsl_local<'a>(node: &'a NodeRef) -> Option<&'a str> {
    match node.expanded_name() {
        Some((Some(XSL_NS), local)) if node.kind() == NodeKind::Element => Some(local),
        _ => None,
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

fn non_empty_attr(node: &NodeRef, name: &str) -> Option<String> {
    node.attribute(name)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required_attr(node: &NodeRef, name: &str) -> Result<String, XsltError> {
    node.attribute(name).map(str::to_string).ok_or_else(|| {
        XsltError::Compile(format!(
            "missing required attribute '{}' on {}",
            name,
            qualified_name(node)
        ))
    })
}

fn required_expr(node: &NodeRef, name: &str) -> Result<Expression, XsltError> {
    Ok(parse_expression(&required_attr(node, name)?)?)
}

fn optional_expr(node: &NodeRef, name: &str) -> Result<Option<Expression>, XsltError> {
    match non_empty_attr(node, name) {
        Some(text) => Ok(Some(parse_expression(&text)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
        <xsl:output indent="yes"/>
        <xsl:strip-space elements="doc item"/>
        <xsl:variable name="greeting" select="'hi'"/>
        <xsl:template match="/">
            <out title="{concat('a', 'b')}"><xsl:apply-templates/></out>
        </xsl:template>
        <xsl:template match="item|@id" name="item-rule" mode="list">
            <xsl:value-of select="."/>
        </xsl:template>
    </xsl:stylesheet>"#;

    #[test]
    fn test_compile_collects_templates_and_rules() {
        let sheet = compile(SHEET).unwrap();
        // Two user templates plus two built-ins.
        assert_eq!(sheet.templates.len(), 4);
        // `/` is one rule; `item|@id` contributes two.
        assert_eq!(sheet.match_rules.len(), 3);
        assert_eq!(sheet.built_in_rules.len(), 4);
        assert_eq!(sheet.named.get("item-rule"), Some(&1));
        assert_eq!(sheet.templates[1].mode.as_deref(), Some("list"));
        assert!(sheet.templates[2].built_in);
        assert!(sheet.output_indent);
        assert_eq!(sheet.strip_space, vec!["doc", "item"]);
        assert_eq!(sheet.top_level.len(), 1);
    }

    #[test]
    fn test_priorities_per_union_alternative() {
        let sheet = compile(SHEET).unwrap();
        let priorities: Vec<f64> = sheet.match_rules.iter().map(|r| r.priority).collect();
        // "/" is 0.5; "item" and "@id" are name tests at 0.
        assert_eq!(priorities, vec![0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_explicit_priority_overrides() {
        let sheet = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:template match="a|b" priority="2.5"/>
            </xsl:stylesheet>"#,
        )
        .unwrap();
        assert!(sheet.match_rules.iter().all(|r| r.priority == 2.5));
    }

    #[test]
    fn test_stylesheet_whitespace_stripped_but_text_kept() {
        let sheet = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:template match="/">
                <xsl:text>  keep  </xsl:text>
            </xsl:template>
            </xsl:stylesheet>"#,
        )
        .unwrap();
        let body = &sheet.templates[0].body;
        assert_eq!(body.len(), 1);
        match &body[0] {
            Instruction::Text(text) => assert_eq!(text, "  keep  "),
            other => panic!("expected text instruction, got {:?}", other),
        }
    }

    #[test]
    fn test_avt_parsing() {
        let avt = parse_avt("a{1 + 2}b{{c}}").unwrap();
        assert_eq!(avt.parts.len(), 3);
        assert!(matches!(&avt.parts[0], AvtPart::Literal(s) if s == "a"));
        assert!(matches!(&avt.parts[1], AvtPart::Expr(_)));
        assert!(matches!(&avt.parts[2], AvtPart::Literal(s) if s == "b{c}"));
        // Braces inside string literals do not terminate the expression.
        let avt = parse_avt("{concat('}', \"x\")}").unwrap();
        assert_eq!(avt.parts.len(), 1);
        assert!(parse_avt("{unterminated").is_err());
    }

    #[test]
    fn test_import_is_unsupported() {
        let result = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:import href="other.xsl"/>
            </xsl:stylesheet>"#,
        );
        assert!(matches!(result, Err(XsltError::UnsupportedFeature(_))));
    }

    #[test]
    fn test_template_without_match_or_name_is_rejected() {
        let result = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:template><x/></xsl:template>
            </xsl:stylesheet>"#,
        );
        assert!(matches!(result, Err(XsltError::Compile(_))));
    }
}
