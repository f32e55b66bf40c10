//! A standalone XPath 1.0 evaluation engine: a materialised node-tree view
//! of parsed XML, an expression compiler, and a recursive evaluator over
//! the four-kind XPath value model.

pub mod ast;
pub mod axes;
pub mod engine;
pub mod error;
pub mod functions;
pub mod operators;
pub mod parser;
pub mod tree;
pub mod value;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, Step};
pub use engine::{EvaluationContext, evaluate, evaluate_string};
pub use error::XPathError;
pub use functions::{ArgSpec, FunctionLibraries, FunctionLibrary};
pub use parser::parse_expression;
pub use tree::{
    Document, NodeId, NodeKind, NodeRef, NodeTree, QName, StripPolicy, strip_whitespace,
};
pub use value::{Value, ValueKind};
