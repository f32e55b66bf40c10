//! The compiled stylesheet model: templates, instructions and attribute
//! value templates, with every XPath expression pre-compiled.

use std::collections::HashMap;

use xylem_xpath1::Expression;

pub const XSL_NS: &str = "http://www.w3.org/1999/XSL/Transform";

#[derive(Debug)]
pub struct CompiledStylesheet {
    pub templates: Vec<Template>,
    /// One entry per match-pattern union alternative of a user template.
    pub match_rules: Vec<MatchRule>,
    /// Match entries of the built-in templates; consulted only when no user
    /// rule matches, and indifferent to mode.
    pub built_in_rules: Vec<MatchRule>,
    /// Named templates, by `name` attribute.
    pub named: HashMap<String, usize>,
    /// Top-level `xsl:variable` / `xsl:param` in document order.
    pub top_level: Vec<TopLevelBinding>,
    pub strip_space: Vec<String>,
    pub preserve_space: Vec<String>,
    pub output_indent: bool,
    /// Prefix bindings of the stylesheet document.
    pub namespaces: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Template {
    pub name: Option<String>,
    pub mode: Option<String>,
    pub built_in: bool,
    pub body: Vec<Instruction>,
}

#[derive(Debug)]
pub struct MatchRule {
    pub pattern: Expression,
    pub priority: f64,
    /// Index into [`CompiledStylesheet::templates`].
    pub template: usize,
    /// The pattern alternative as written, for diagnostics.
    pub text: String,
}

#[derive(Debug)]
pub struct TopLevelBinding {
    pub name: String,
    pub binding: Binding,
    pub is_param: bool,
}

/// How a variable, parameter or with-param obtains its value.
#[derive(Debug)]
pub enum Binding {
    Select(Expression),
    /// Body content evaluated into a result-tree fragment.
    Content(Vec<Instruction>),
    /// Neither select nor content: the empty string.
    Empty,
}

#[derive(Debug)]
pub enum Instruction {
    /// Literal text, from character data or `xsl:text`.
    Text(String),
    ValueOf {
        select: Expression,
    },
    ApplyTemplates {
        select: Option<Expression>,
        mode: Option<String>,
    },
    CallTemplate {
        name: String,
        params: Vec<(String, Binding)>,
    },
    ForEach {
        select: Expression,
        body: Vec<Instruction>,
    },
    If {
        test: Expression,
        body: Vec<Instruction>,
    },
    Choose {
        whens: Vec<When>,
        otherwise: Option<Vec<Instruction>>,
    },
    Variable {
        name: String,
        binding: Binding,
    },
    Param {
        name: String,
        binding: Binding,
    },
    CopyOf {
        select: Expression,
    },
    Element {
        name: Avt,
        body: Vec<Instruction>,
    },
    /// Any non-XSLT element in a template body.
    LiteralElement {
        name: String,
        attributes: Vec<(String, Avt)>,
        body: Vec<Instruction>,
    },
    /// A recognised instruction outside the minimal core; fails when
    /// actually executed.
    Unsupported(String),
}

#[derive(Debug)]
pub struct When {
    pub test: Expression,
    pub body: Vec<Instruction>,
}

/// An attribute value template: literal runs interleaved with `{expr}`
/// substitutions.
#[derive(Debug)]
pub struct Avt {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug)]
pub enum AvtPart {
    Literal(String),
    Expr(Expression),
}
