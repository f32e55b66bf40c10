//! Match-pattern compilation and evaluation.
//!
//! Patterns are compiled with the full XPath parser and evaluated with the
//! full engine: a pattern matches node X iff, for some ancestor-or-self Y
//! of X, evaluating the pattern with Y as context yields a node-set
//! containing X. Default priorities follow the XSLT 1.0 §5.5 rules, one
//! per union alternative.

use std::collections::HashMap;

use xylem_xpath1::ast::{Axis, NodeTest, NodeTypeTest};
use xylem_xpath1::{
    BinaryOperator, EvaluationContext, Expression, FunctionLibraries, NodeRef, Value, evaluate,
    parse_expression,
};

use crate::error::XsltError;

#[derive(Debug)]
pub struct Pattern {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug)]
pub struct Alternative {
    pub expr: Expression,
    pub default_priority: f64,
    pub text: String,
}

/// Compiles a `match` pattern, splitting top-level unions into separately
/// prioritised alternatives.
pub fn parse(text: &str) -> Result<Pattern, XsltError> {
    let expr = parse_expression(text)?;
    let mut alternatives = Vec::new();
    split_union(expr, &mut alternatives);
    Ok(Pattern {
        alternatives: alternatives
            .into_iter()
            .map(|expr| {
                let default_priority = default_priority(&expr);
                let text = expr.to_string();
                Alternative {
                    expr,
                    default_priority,
                    text,
                }
            })
            .collect(),
    })
}

fn split_union(expr: Expression, out: &mut Vec<Expression>) {
    match expr {
        Expression::BinaryOp {
            left,
            op: BinaryOperator::Union,
            right,
        } => {
            split_union(*left, out);
            split_union(*right, out);
        }
        other => out.push(other),
    }
}

/// XSLT 1.0 §5.5: a single child-or-attribute step with a plain QName test
/// is 0, `prefix:*` is -0.25, any other node test is -0.5 (but a
/// processing-instruction test with a target literal is 0); everything
/// else is 0.5.
fn default_priority(expr: &Expression) -> f64 {
    let Expression::LocationPath(lp) = expr else {
        return 0.5;
    };
    if lp.is_absolute || lp.steps.len() != 1 {
        return 0.5;
    }
    let step = &lp.steps[0];
    if !step.predicates.is_empty() || !matches!(step.axis, Axis::Child | Axis::Attribute) {
        return 0.5;
    }
    match &step.node_test {
        NodeTest::Name { .. } => 0.0,
        NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(Some(_))) => 0.0,
        NodeTest::PrefixWildcard(_) => -0.25,
        NodeTest::Wildcard | NodeTest::NodeType(_) => -0.5,
    }
}

/// Evaluates one pattern alternative against a node.
pub fn matches(
    expr: &Expression,
    node: &NodeRef,
    functions: &FunctionLibraries,
    variables: &HashMap<String, Value>,
    namespaces: &HashMap<String, String>,
) -> Result<bool, XsltError> {
    let mut anchor = Some(node.clone());
    while let Some(context) = anchor {
        anchor = context.parent();
        let ctx = EvaluationContext::new(
            context,
            node.root(),
            functions,
            1,
            1,
            variables,
            namespaces,
        );
        if let Value::NodeSet(found) = evaluate(expr, &ctx)?
            && found.contains(node)
        {
            return Ok(true);
        }
    }
    Ok(false)
}
