//! The registry and built-in implementations for the XPath 1.0 core
//! function library.
//!
//! Functions are plain data records: a name, the declared argument kinds,
//! the return kind, and a function pointer. Arity is checked and arguments
//! are coerced toward their declared kinds at call time, so the bodies can
//! assume well-typed input.

use std::collections::HashMap;

use super::engine::EvaluationContext;
use crate::error::XPathError;
use crate::operators::sorted_unique;
use crate::tree::{NodeKind, NodeRef};
use crate::value::{Value, ValueKind, string_to_number, xpath_round};

const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

pub type FunctionImpl = fn(&EvaluationContext<'_>, Vec<Value>) -> Result<Value, XPathError>;

/// Declared shape of one argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    Required(ValueKind),
    Optional(ValueKind),
    /// Zero or more further arguments of this kind (last position only).
    Variadic(ValueKind),
}

#[derive(Clone)]
pub struct Function {
    pub args: &'static [ArgSpec],
    pub returns: ValueKind,
    pub run: FunctionImpl,
}

/// One named collection of functions.
#[derive(Default)]
pub struct FunctionLibrary {
    functions: HashMap<&'static str, Function>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &'static str,
        args: &'static [ArgSpec],
        returns: ValueKind,
        run: FunctionImpl,
    ) {
        self.functions.insert(name, Function { args, returns, run });
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

/// The ordered set of libraries visible to one evaluation; the first
/// library defining a name wins.
#[derive(Default)]
pub struct FunctionLibraries {
    libraries: Vec<FunctionLibrary>,
}

impl FunctionLibraries {
    /// Just the core XPath 1.0 library.
    pub fn core() -> Self {
        FunctionLibraries {
            libraries: vec![core_library()],
        }
    }

    /// Appends a lower-precedence library.
    pub fn with_library(mut self, library: FunctionLibrary) -> Self {
        self.libraries.push(library);
        self
    }

    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Value, XPathError> {
        for library in &self.libraries {
            if let Some(function) = library.get(name) {
                let coerced = coerce_arguments(name, function, args)?;
                return (function.run)(ctx, coerced);
            }
        }
        Err(XPathError::UnknownFunction(name.to_string()))
    }
}

/// Checks arity and coerces each argument toward its declared kind.
fn coerce_arguments(
    name: &str,
    function: &Function,
    args: Vec<Value>,
) -> Result<Vec<Value>, XPathError> {
    let min = function
        .args
        .iter()
        .filter(|a| matches!(a, ArgSpec::Required(_)))
        .count();
    let variadic = matches!(function.args.last(), Some(ArgSpec::Variadic(_)));
    let max = function.args.len();

    if args.len() < min || (!variadic && args.len() > max) {
        let expected = if variadic {
            format!("at least {}", min)
        } else if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(XPathError::ArgumentArity {
            function: name.to_string(),
            expected,
            got: args.len(),
        });
    }

    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            let spec = function.args.get(i).or(function.args.last());
            let kind = match spec {
                Some(ArgSpec::Required(k)) | Some(ArgSpec::Optional(k)) | Some(ArgSpec::Variadic(k)) => *k,
                None => ValueKind::Object,
            };
            arg.coerce(kind).map_err(|_| {
                XPathError::TypeError(format!(
                    "argument {} of {}() must be a {:?}",
                    i + 1,
                    name,
                    kind
                ))
            })
        })
        .collect()
}

/// Builds the core XPath 1.0 function library.
pub fn core_library() -> FunctionLibrary {
    use ArgSpec::{Optional, Required, Variadic};
    use ValueKind::{Boolean, NodeSet, Number, Object, String};

    let mut library = FunctionLibrary::new();
    // Node-set
    library.register("last", &[], Number, func_last);
    library.register("position", &[], Number, func_position);
    library.register("count", &[Required(NodeSet)], Number, func_count);
    library.register("id", &[Required(Object)], NodeSet, func_id);
    library.register("local-name", &[Optional(NodeSet)], String, func_local_name);
    library.register("namespace-uri", &[Optional(NodeSet)], String, func_namespace_uri);
    library.register("name", &[Optional(NodeSet)], String, func_name);
    // String
    library.register("string", &[Optional(Object)], String, func_string);
    library.register(
        "concat",
        &[Required(String), Required(String), Variadic(String)],
        String,
        func_concat,
    );
    library.register(
        "starts-with",
        &[Required(String), Required(String)],
        Boolean,
        func_starts_with,
    );
    library.register(
        "contains",
        &[Required(String), Required(String)],
        Boolean,
        func_contains,
    );
    library.register(
        "substring-before",
        &[Required(String), Required(String)],
        String,
        func_substring_before,
    );
    library.register(
        "substring-after",
        &[Required(String), Required(String)],
        String,
        func_substring_after,
    );
    library.register(
        "substring",
        &[Required(String), Required(Number), Optional(Number)],
        String,
        func_substring,
    );
    library.register("string-length", &[Optional(String)], Number, func_string_length);
    library.register("normalize-space", &[Optional(String)], String, func_normalize_space);
    library.register(
        "translate",
        &[Required(String), Required(String), Required(String)],
        String,
        func_translate,
    );
    // Boolean
    library.register("boolean", &[Required(Object)], Boolean, func_boolean);
    library.register("not", &[Required(Boolean)], Boolean, func_not);
    library.register("true", &[], Boolean, func_true);
    library.register("false", &[], Boolean, func_false);
    library.register("lang", &[Required(String)], Boolean, func_lang);
    // Number
    library.register("number", &[Optional(Object)], Number, func_number);
    library.register("sum", &[Required(NodeSet)], Number, func_sum);
    library.register("floor", &[Required(Number)], Number, func_floor);
    library.register("ceiling", &[Required(Number)], Number, func_ceiling);
    library.register("round", &[Required(Number)], Number, func_round);
    library
}

// --- Node-Set Functions ---

fn func_last(ctx: &EvaluationContext<'_>, _args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Number(ctx.size as f64))
}

fn func_position(ctx: &EvaluationContext<'_>, _args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Number(ctx.position as f64))
}

fn func_count(_ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let nodes = args.remove(0).into_node_set("count()")?;
    Ok(Value::Number(nodes.len() as f64))
}

/// `id(object)`: a node-set argument contributes each member's string-value;
/// anything else is split on whitespace into individual ID tokens.
fn func_id(ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let root = ctx.context_node.root();
    let mut tokens = Vec::new();
    match args.remove(0) {
        Value::NodeSet(nodes) => {
            for node in nodes {
                tokens.extend(
                    node.string_value()
                        .split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>(),
                );
            }
        }
        other => tokens.extend(other.to_string().split_whitespace().map(str::to_string)),
    }
    let mut results = Vec::new();
    for token in tokens {
        if let Some(element) = root.element_by_id(&token) {
            results.push(element);
        }
    }
    Ok(Value::NodeSet(sorted_unique(results)))
}

/// The subject node of the optional-node-set name functions: the first node
/// of the argument in document order, or the context node without one.
fn name_subject(
    ctx: &EvaluationContext<'_>,
    args: &mut Vec<Value>,
) -> Result<Option<NodeRef>, XPathError> {
    if args.is_empty() {
        return Ok(Some(ctx.context_node.clone()));
    }
    let nodes = args.remove(0).into_node_set("a name function")?;
    Ok(nodes.into_iter().next())
}

fn func_local_name(ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let name = name_subject(ctx, &mut args)?
        .and_then(|n| n.name().map(|q| q.local_part.to_string()))
        .unwrap_or_default();
    Ok(Value::String(name))
}

fn func_namespace_uri(
    ctx: &EvaluationContext<'_>,
    mut args: Vec<Value>,
) -> Result<Value, XPathError> {
    let uri = name_subject(ctx, &mut args)?
        .and_then(|n| n.expanded_name().and_then(|(uri, _)| uri.map(str::to_string)))
        .unwrap_or_default();
    Ok(Value::String(uri))
}

fn func_name(ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let name = name_subject(ctx, &mut args)?
        .and_then(|n| {
            n.name().map(|q| match q.prefix {
                Some(prefix) => format!("{}:{}", prefix, q.local_part),
                None => q.local_part.to_string(),
            })
        })
        .unwrap_or_default();
    Ok(Value::String(name))
}

// --- String Functions ---

fn func_string(ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let s = if args.is_empty() {
        ctx.context_node.string_value()
    } else {
        args.remove(0).to_string()
    };
    Ok(Value::String(s))
}

fn func_concat(_ctx: &EvaluationContext<'_>, args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::String(
        args.iter().map(|v| v.to_string()).collect::<String>(),
    ))
}

fn func_starts_with(_ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let needle = args.remove(1).to_string();
    let haystack = args.remove(0).to_string();
    Ok(Value::Boolean(haystack.starts_with(&needle)))
}

fn func_contains(_ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let needle = args.remove(1).to_string();
    let haystack = args.remove(0).to_string();
    Ok(Value::Boolean(haystack.contains(&needle)))
}

fn func_substring_before(
    _ctx: &EvaluationContext<'_>,
    mut args: Vec<Value>,
) -> Result<Value, XPathError> {
    let needle = args.remove(1).to_string();
    let haystack = args.remove(0).to_string();
    let result = match haystack.find(&needle) {
        Some(index) => haystack[..index].to_string(),
        None => String::new(),
    };
    Ok(Value::String(result))
}

fn func_substring_after(
    _ctx: &EvaluationContext<'_>,
    mut args: Vec<Value>,
) -> Result<Value, XPathError> {
    let needle = args.remove(1).to_string();
    let haystack = args.remove(0).to_string();
    let result = match haystack.find(&needle) {
        Some(index) => haystack[index + needle.len()..].to_string(),
        None => String::new(),
    };
    Ok(Value::String(result))
}

/// 1-based character positions; start and length round with the XPath
/// `round` rules, and NaN anywhere produces the empty string.
fn func_substring(_ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let length = if args.len() == 3 {
        Some(args.remove(2).to_number())
    } else {
        None
    };
    let start = args.remove(1).to_number();
    let s = args.remove(0).to_string();

    let first = xpath_round(start);
    let last = length.map(|l| first + xpath_round(l));

    let result = s
        .chars()
        .enumerate()
        .filter_map(|(i, c)| {
            let position = (i + 1) as f64;
            let after_start = position >= first;
            let before_end = match last {
                Some(end) => position < end,
                None => true,
            };
            (after_start && before_end).then_some(c)
        })
        .collect::<String>();
    Ok(Value::String(result))
}

fn func_string_length(
    ctx: &EvaluationContext<'_>,
    mut args: Vec<Value>,
) -> Result<Value, XPathError> {
    let s = if args.is_empty() {
        ctx.context_node.string_value()
    } else {
        args.remove(0).to_string()
    };
    Ok(Value::Number(s.chars().count() as f64))
}

fn func_normalize_space(
    ctx: &EvaluationContext<'_>,
    mut args: Vec<Value>,
) -> Result<Value, XPathError> {
    let s = if args.is_empty() {
        ctx.context_node.string_value()
    } else {
        args.remove(0).to_string()
    };
    let normalized = s
        .split([' ', '\t', '\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Value::String(normalized))
}

/// Character-wise mapping; `from` characters beyond the end of `to` delete.
fn func_translate(_ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let to: Vec<char> = args.remove(2).to_string().chars().collect();
    let from: Vec<char> = args.remove(1).to_string().chars().collect();
    let source = args.remove(0).to_string();
    let result = source
        .chars()
        .filter_map(|c| match from.iter().position(|&fc| fc == c) {
            Some(index) => to.get(index).copied(),
            None => Some(c),
        })
        .collect::<String>();
    Ok(Value::String(result))
}

// --- Boolean Functions ---

fn func_boolean(_ctx: &EvaluationContext<'_>, args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Boolean(args[0].to_bool()))
}

fn func_not(_ctx: &EvaluationContext<'_>, args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Boolean(!args[0].to_bool()))
}

fn func_true(_ctx: &EvaluationContext<'_>, _args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Boolean(true))
}

fn func_false(_ctx: &EvaluationContext<'_>, _args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Boolean(false))
}

/// Walks ancestor-or-self for `xml:lang`; the nearest declaration decides,
/// matching case-insensitively on the language or a `-`-separated prefix.
fn func_lang(ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let wanted = args.remove(0).to_string().to_lowercase();
    let mut current = Some(ctx.context_node.clone());
    if current.as_ref().is_some_and(|n| n.kind() != NodeKind::Element) {
        current = current.and_then(|n| n.parent());
    }
    while let Some(node) = current {
        for attr in node.attributes() {
            if attr.expanded_name() == Some((Some(XML_URI), "lang")) {
                let declared = attr.string_value().to_lowercase();
                let matched = declared == wanted
                    || declared.starts_with(&format!("{}-", wanted));
                return Ok(Value::Boolean(matched));
            }
        }
        current = node.parent();
    }
    Ok(Value::Boolean(false))
}

// --- Number Functions ---

fn func_number(ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let n = if args.is_empty() {
        string_to_number(&ctx.context_node.string_value())
    } else {
        args.remove(0).to_number()
    };
    Ok(Value::Number(n))
}

fn func_sum(_ctx: &EvaluationContext<'_>, mut args: Vec<Value>) -> Result<Value, XPathError> {
    let nodes = args.remove(0).into_node_set("sum()")?;
    let sum = nodes
        .iter()
        .map(|node| string_to_number(&node.string_value()))
        .sum();
    Ok(Value::Number(sum))
}

fn func_floor(_ctx: &EvaluationContext<'_>, args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Number(args[0].to_number().floor()))
}

fn func_ceiling(_ctx: &EvaluationContext<'_>, args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Number(args[0].to_number().ceil()))
}

fn func_round(_ctx: &EvaluationContext<'_>, args: Vec<Value>) -> Result<Value, XPathError> {
    Ok(Value::Number(xpath_round(args[0].to_number())))
}
