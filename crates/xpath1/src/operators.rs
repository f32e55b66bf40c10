//! Binary operator evaluation over the value model.
//!
//! `and`/`or` short-circuit in the engine and never reach this module.

use crate::ast::BinaryOperator;
use crate::error::XPathError;
use crate::tree::NodeRef;
use crate::value::{Value, ValueKind, string_to_number};

/// Applies an already-evaluated binary operator to its operand values.
pub fn apply(op: BinaryOperator, left: Value, right: Value) -> Result<Value, XPathError> {
    match op {
        BinaryOperator::Union => union(left, right),
        BinaryOperator::Equals
        | BinaryOperator::NotEquals
        | BinaryOperator::LessThan
        | BinaryOperator::LessThanOrEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanOrEqual => Ok(Value::Boolean(compare(op, &left, &right))),
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => Ok(Value::Number(numeric(op, &left, &right))),
        BinaryOperator::And | BinaryOperator::Or => {
            unreachable!("boolean operators short-circuit in the evaluator")
        }
    }
}

/// Set union; the only operator restricted to node-sets.
pub fn union(left: Value, right: Value) -> Result<Value, XPathError> {
    let mut nodes = left.into_node_set("the '|' operator")?;
    nodes.extend(right.into_node_set("the '|' operator")?);
    Ok(Value::NodeSet(sorted_unique(nodes)))
}

/// Canonicalises a node list: document order, duplicates removed.
pub fn sorted_unique(mut nodes: Vec<NodeRef>) -> Vec<NodeRef> {
    nodes.sort();
    nodes.dedup();
    nodes
}

fn numeric(op: BinaryOperator, left: &Value, right: &Value) -> f64 {
    let l = left.to_number();
    let r = right.to_number();
    match op {
        BinaryOperator::Plus => l + r,
        BinaryOperator::Minus => l - r,
        BinaryOperator::Multiply => l * r,
        // IEEE-754 semantics: 1 div 0 is an infinity, 0 div 0 is NaN.
        BinaryOperator::Divide => l / r,
        // Remainder keeps the sign of the dividend.
        BinaryOperator::Modulo => l % r,
        _ => unreachable!(),
    }
}

/// The XPath 1.0 comparison rules, with node-set operands reduced to an
/// existential quantifier over their members' string-values.
fn compare(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::NodeSet(l), Value::NodeSet(r)) => l.iter().any(|a| {
            let a = a.string_value();
            r.iter()
                .any(|b| compare_plain(op, &Value::String(a.clone()), &Value::String(b.string_value())))
        }),
        (Value::NodeSet(nodes), other) => nodes
            .iter()
            .any(|n| compare_node_member(op, &n.string_value(), other, false)),
        (other, Value::NodeSet(nodes)) => nodes
            .iter()
            .any(|n| compare_node_member(op, &n.string_value(), other, true)),
        (l, r) => compare_plain(op, l, r),
    }
}

/// Compares one node-set member against a non-node-set operand. `flipped`
/// is true when the node-set was the right operand.
fn compare_node_member(op: BinaryOperator, string_value: &str, other: &Value, flipped: bool) -> bool {
    let member: Value = match other.kind() {
        ValueKind::Number => Value::Number(string_to_number(string_value)),
        ValueKind::Boolean => {
            // A non-empty node-set is true; the member itself is irrelevant.
            Value::Boolean(true)
        }
        _ => Value::String(string_value.to_string()),
    };
    if flipped {
        compare_plain(op, other, &member)
    } else {
        compare_plain(op, &member, other)
    }
}

fn compare_plain(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    use BinaryOperator::*;
    match op {
        Equals | NotEquals => {
            let equal = if left.kind() == ValueKind::Boolean || right.kind() == ValueKind::Boolean {
                left.to_bool() == right.to_bool()
            } else if left.kind() == ValueKind::Number || right.kind() == ValueKind::Number {
                left.to_number() == right.to_number()
            } else {
                left.to_string() == right.to_string()
            };
            (op == Equals) == equal
        }
        // Relational comparison is always numeric; NaN defeats all four.
        LessThan => left.to_number() < right.to_number(),
        LessThanOrEqual => left.to_number() <= right.to_number(),
        GreaterThan => left.to_number() > right.to_number(),
        GreaterThanOrEqual => left.to_number() >= right.to_number(),
        _ => unreachable!(),
    }
}
