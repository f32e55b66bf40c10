//! Defines the Abstract Syntax Tree (AST) for XPath 1.0 expressions.
//!
//! Every node carries a `Display` impl that renders it back to surface
//! syntax; the rendered text re-parses to an equal tree.

use std::fmt;

use crate::value::number_to_string;

/// The top-level expression that can be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    LocationPath(LocationPath),
    /// A primary expression filtered by predicates, e.g. `(//q)[1]` or `$set[2]`.
    Filter {
        primary: Box<Expression>,
        predicates: Vec<Expression>,
    },
    /// A primary expression continued by a relative path, e.g. `$var/item` or `id('a')/title`.
    Path {
        start: Box<Expression>,
        path: LocationPath,
    },
    /// A path whose final component is a function call, applied with the
    /// first selected node (in document order) as context, e.g.
    /// `id('a b')/local-name()`.
    ContextCall {
        source: Box<Expression>,
        call: Box<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
}

impl Expression {
    /// Checks if the expression is a `LocationPath` variant.
    pub fn is_location_path(&self) -> bool {
        matches!(self, Expression::LocationPath(_))
    }

    /// Checks if the expression is a `BinaryOp` variant.
    pub fn is_binary_op(&self) -> bool {
        matches!(self, Expression::BinaryOp { .. })
    }
}

/// A unary operator used in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

/// A binary operator used in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,
    // Equality
    Equals,
    NotEquals,
    // Relational
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Additive
    Plus,
    Minus,
    // Multiplicative
    Multiply,
    Divide,
    Modulo,
    // Set
    Union,
}

/// Represents a full location path, like `/child::foo` or `descendant::bar[1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// True if the path starts from the document root (e.g., `/foo`).
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

/// Represents a single step in a location path, like `child::foo[position() > 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

impl Step {
    /// The `node()` step injected for the `//` abbreviation.
    pub fn any_node(axis: Axis) -> Self {
        Step {
            axis,
            node_test: NodeTest::NodeType(NodeTypeTest::Node),
            predicates: Vec::new(),
        }
    }
}

/// The axis of movement from the context node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Attribute,
    Namespace,
    SelfAxis,
}

impl Axis {
    /// Reverse axes yield their nodes in reverse document order, which is
    /// the order positional predicates count in.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent
                | Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::PrecedingSibling
                | Axis::Preceding
        )
    }
}

/// A test to apply to nodes on a given axis to see if they should be included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A wildcard test (`*`).
    Wildcard,
    /// A namespace-constrained wildcard (`prefix:*`).
    PrefixWildcard(String),
    /// A qualified name test (e.g., `foo`, `xsl:if`).
    Name {
        prefix: Option<String>,
        local: String,
    },
    /// A node type test (e.g., `text()`, `node()`).
    NodeType(NodeTypeTest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTypeTest {
    Node,
    Text,
    Comment,
    /// `processing-instruction()`, optionally with a target literal.
    ProcessingInstruction(Option<String>),
}

// --- Surface-syntax rendering ---

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Equals => "=",
            BinaryOperator::NotEquals => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "div",
            BinaryOperator::Modulo => "mod",
            BinaryOperator::Union => "|",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Axis::Child => "child",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Parent => "parent",
            Axis::Ancestor => "ancestor",
            Axis::AncestorOrSelf => "ancestor-or-self",
            Axis::FollowingSibling => "following-sibling",
            Axis::PrecedingSibling => "preceding-sibling",
            Axis::Following => "following",
            Axis::Preceding => "preceding",
            Axis::Attribute => "attribute",
            Axis::Namespace => "namespace",
            Axis::SelfAxis => "self",
        };
        f.write_str(s)
    }
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTest::Wildcard => f.write_str("*"),
            NodeTest::PrefixWildcard(prefix) => write!(f, "{}:*", prefix),
            NodeTest::Name { prefix: Some(p), local } => write!(f, "{}:{}", p, local),
            NodeTest::Name { prefix: None, local } => f.write_str(local),
            NodeTest::NodeType(ntt) => write!(f, "{}", ntt),
        }
    }
}

impl fmt::Display for NodeTypeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTypeTest::Node => f.write_str("node()"),
            NodeTypeTest::Text => f.write_str("text()"),
            NodeTypeTest::Comment => f.write_str("comment()"),
            NodeTypeTest::ProcessingInstruction(None) => f.write_str("processing-instruction()"),
            NodeTypeTest::ProcessingInstruction(Some(target)) => {
                write!(f, "processing-instruction('{}')", target)
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.axis, self.node_test)?;
        for predicate in &self.predicates {
            write!(f, "[{}]", predicate)?;
        }
        Ok(())
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute {
            f.write_str("/")?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Writes a primary sub-expression, parenthesising forms the grammar would
/// otherwise not accept in primary position.
fn fmt_primary(expr: &Expression, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr {
        Expression::Literal(_)
        | Expression::Number(_)
        | Expression::Variable(_)
        | Expression::FunctionCall { .. }
        | Expression::Filter { .. } => write!(f, "{}", expr),
        other => write!(f, "({})", other),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(s) => {
                if s.contains('\'') {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "'{}'", s)
                }
            }
            Expression::Number(n) => f.write_str(&number_to_string(*n)),
            Expression::Variable(name) => write!(f, "${}", name),
            Expression::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expression::LocationPath(path) => write!(f, "{}", path),
            Expression::Filter { primary, predicates } => {
                fmt_primary(primary, f)?;
                for predicate in predicates {
                    write!(f, "[{}]", predicate)?;
                }
                Ok(())
            }
            Expression::Path { start, path } => {
                fmt_primary(start, f)?;
                write!(f, "/{}", path)
            }
            Expression::ContextCall { source, call } => {
                fmt_primary(source, f)?;
                write!(f, "/{}", call)
            }
            Expression::BinaryOp { left, op, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::UnaryOp { op: UnaryOperator::Minus, expr } => {
                write!(f, "-{}", expr)
            }
        }
    }
}
