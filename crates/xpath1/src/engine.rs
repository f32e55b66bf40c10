//! The evaluation engine for executing a parsed XPath AST against a node tree.

use std::collections::HashMap;

use log::trace;

use super::ast::{Axis, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator};
use super::functions::FunctionLibraries;
use super::{axes, operators};
use crate::error::XPathError;
use crate::tree::{Document, NodeKind, NodeRef};
use crate::value::Value;

const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// A container for all state needed during expression evaluation.
///
/// Contexts are immutable; sub-contexts are produced by copy-with-override
/// (`with_node`), never by mutation, so evaluation of one predicate can
/// never disturb its siblings.
#[derive(Clone)]
pub struct EvaluationContext<'d> {
    pub context_node: NodeRef,
    pub root_node: NodeRef,
    pub functions: &'d FunctionLibraries,
    /// 1-based position of the context node within the context size.
    pub position: usize,
    pub size: usize,
    pub variables: &'d HashMap<String, Value>,
    /// Namespace prefix bindings for QNames in the expression.
    pub namespaces: &'d HashMap<String, String>,
}

impl<'d> EvaluationContext<'d> {
    pub fn new(
        context_node: NodeRef,
        root_node: NodeRef,
        functions: &'d FunctionLibraries,
        position: usize,
        size: usize,
        variables: &'d HashMap<String, Value>,
        namespaces: &'d HashMap<String, String>,
    ) -> Self {
        Self {
            context_node,
            root_node,
            functions,
            position,
            size,
            variables,
            namespaces,
        }
    }

    pub fn with_node(&self, node: NodeRef, position: usize, size: usize) -> Self {
        let mut sub = self.clone();
        sub.context_node = node;
        sub.position = position;
        sub.size = size;
        sub
    }

    /// Resolves a namespace prefix; `xml` is always bound.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        match self.namespaces.get(prefix) {
            Some(uri) => Some(uri.as_str()),
            None if prefix == "xml" => Some(XML_URI),
            None => None,
        }
    }
}

/// Evaluates a compiled expression and returns a concrete [`Value`].
pub fn evaluate(expr: &Expression, ctx: &EvaluationContext<'_>) -> Result<Value, XPathError> {
    match expr {
        Expression::Literal(s) => Ok(Value::String(s.clone())),
        Expression::Number(n) => Ok(Value::Number(*n)),
        Expression::Variable(name) => ctx
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| XPathError::UnboundVariable(name.clone())),
        Expression::FunctionCall { name, args } => {
            // Arguments evaluate left to right before the call.
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(evaluate(arg, ctx)?);
            }
            trace!("calling {}() with {} arguments", name, evaluated.len());
            ctx.functions.call(name, evaluated, ctx)
        }
        Expression::LocationPath(path) => {
            Ok(Value::NodeSet(evaluate_location_path(path, ctx)?))
        }
        Expression::Filter { primary, predicates } => {
            let nodes = evaluate(primary, ctx)?
                .into_node_set("a filter expression")?;
            Ok(Value::NodeSet(apply_predicates(nodes, predicates, ctx)?))
        }
        Expression::Path { start, path } => {
            let start_nodes = evaluate(start, ctx)?
                .into_node_set("a path expression")?;
            Ok(Value::NodeSet(apply_steps(&path.steps, start_nodes, ctx)?))
        }
        Expression::ContextCall { source, call } => {
            let nodes = evaluate(source, ctx)?
                .into_node_set("a path expression")?;
            let size = nodes.len();
            match nodes.into_iter().next() {
                Some(first) => evaluate(call, &ctx.with_node(first, 1, size)),
                None => Ok(Value::String(String::new())),
            }
        }
        Expression::BinaryOp { left, op, right } => match op {
            // Short-circuit evaluation; the right side may never run.
            super::ast::BinaryOperator::And => {
                if !evaluate(left, ctx)?.to_bool() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(evaluate(right, ctx)?.to_bool()))
            }
            super::ast::BinaryOperator::Or => {
                if evaluate(left, ctx)?.to_bool() {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(evaluate(right, ctx)?.to_bool()))
            }
            _ => {
                let left_value = evaluate(left, ctx)?;
                let right_value = evaluate(right, ctx)?;
                operators::apply(*op, left_value, right_value)
            }
        },
        Expression::UnaryOp { op: UnaryOperator::Minus, expr } => {
            Ok(Value::Number(-evaluate(expr, ctx)?.to_number()))
        }
    }
}

fn evaluate_location_path(
    path: &LocationPath,
    ctx: &EvaluationContext<'_>,
) -> Result<Vec<NodeRef>, XPathError> {
    let start = if path.is_absolute {
        ctx.context_node.root()
    } else {
        ctx.context_node.clone()
    };
    apply_steps(&path.steps, vec![start], ctx)
}

/// Threads a node set through a sequence of steps, unioning the
/// per-source-node results and canonicalising to document order.
pub(crate) fn apply_steps(
    steps: &[Step],
    mut current: Vec<NodeRef>,
    ctx: &EvaluationContext<'_>,
) -> Result<Vec<NodeRef>, XPathError> {
    for step in steps {
        let mut next = Vec::new();
        for node in &current {
            next.extend(evaluate_step(step, node, ctx)?);
        }
        current = operators::sorted_unique(next);
    }
    Ok(current)
}

/// One step from one source node: materialise the axis, filter by the node
/// test, then apply predicates with positions counted in the axis's natural
/// order (reverse document order for reverse axes).
fn evaluate_step(
    step: &Step,
    node: &NodeRef,
    ctx: &EvaluationContext<'_>,
) -> Result<Vec<NodeRef>, XPathError> {
    let tested: Vec<NodeRef> = axes::collect(step.axis, node)
        .into_iter()
        .filter(|candidate| test_node(&step.node_test, step.axis, candidate, ctx))
        .collect();
    apply_predicates(tested, &step.predicates, ctx)
}

/// Filters a node list through predicates left to right. A numeric
/// predicate value keeps the node whose position equals it exactly;
/// anything else coerces to boolean.
pub(crate) fn apply_predicates(
    nodes: Vec<NodeRef>,
    predicates: &[Expression],
    ctx: &EvaluationContext<'_>,
) -> Result<Vec<NodeRef>, XPathError> {
    let mut current = nodes;
    for predicate in predicates {
        let size = current.len();
        let mut kept = Vec::new();
        for (index, node) in current.iter().enumerate() {
            let sub = ctx.with_node(node.clone(), index + 1, size);
            let result = evaluate(predicate, &sub)?;
            let keep = match result {
                Value::Number(n) => n == (index + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(node.clone());
            }
        }
        current = kept;
    }
    Ok(current)
}

/// The principal node kind of an axis governs what a NameTest can match.
fn principal_kind(axis: Axis) -> NodeKind {
    match axis {
        Axis::Attribute => NodeKind::Attribute,
        Axis::Namespace => NodeKind::Namespace,
        _ => NodeKind::Element,
    }
}

fn test_node(
    test: &NodeTest,
    axis: Axis,
    node: &NodeRef,
    ctx: &EvaluationContext<'_>,
) -> bool {
    match test {
        NodeTest::Wildcard => node.kind() == principal_kind(axis),
        NodeTest::PrefixWildcard(prefix) => {
            if node.kind() != principal_kind(axis) {
                return false;
            }
            match ctx.resolve_prefix(prefix) {
                Some(uri) => node.expanded_name().map(|(u, _)| u) == Some(Some(uri)),
                None => false,
            }
        }
        NodeTest::Name { prefix, local } => {
            if node.kind() != principal_kind(axis) {
                return false;
            }
            let want_uri = match prefix {
                Some(p) => match ctx.resolve_prefix(p) {
                    Some(uri) => Some(uri),
                    // An unresolvable prefix matches nothing.
                    None => return false,
                },
                None => None,
            };
            node.expanded_name() == Some((want_uri, local.as_str()))
        }
        NodeTest::NodeType(NodeTypeTest::Node) => true,
        NodeTest::NodeType(NodeTypeTest::Text) => node.kind() == NodeKind::Text,
        NodeTest::NodeType(NodeTypeTest::Comment) => node.kind() == NodeKind::Comment,
        NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(target)) => {
            node.kind() == NodeKind::ProcessingInstruction
                && match target {
                    Some(t) => node.name().is_some_and(|q| q.local_part == t),
                    None => true,
                }
        }
    }
}

/// Compiles and evaluates an expression against a document's root with
/// default context (position 1 of 1, no variables, the core library).
pub fn evaluate_string(text: &str, doc: &Document) -> Result<Value, XPathError> {
    let expr = super::parser::parse_expression(text)?;
    let functions = FunctionLibraries::core();
    let variables = HashMap::new();
    let ctx = EvaluationContext::new(
        doc.root(),
        doc.root(),
        &functions,
        1,
        1,
        &variables,
        doc.namespaces(),
    );
    evaluate(&expr, &ctx)
}
