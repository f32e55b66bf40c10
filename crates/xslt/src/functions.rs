//! The XSLT additions to the XPath function library.
//!
//! Layered behind the core library (first definition wins). `generate-id`
//! is implemented; `document`, `key`, `format-number`, `current` and the
//! remaining XSLT additions are outside the minimal core and raise
//! `UnsupportedFeature` when called.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use xylem_xpath1::engine::EvaluationContext;
use xylem_xpath1::functions::FunctionLibrary;
use xylem_xpath1::{ArgSpec, Value, ValueKind, XPathError};

pub fn xslt_library() -> FunctionLibrary {
    use ArgSpec::{Optional, Required};
    use ValueKind::{NodeSet, Number, Object, String};

    let mut library = FunctionLibrary::new();
    library.register("generate-id", &[Optional(NodeSet)], String, func_generate_id);
    library.register(
        "document",
        &[Required(Object), Optional(NodeSet)],
        NodeSet,
        |_, _| unsupported("document()"),
    );
    library.register(
        "key",
        &[Required(String), Required(Object)],
        NodeSet,
        |_, _| unsupported("key()"),
    );
    library.register(
        "format-number",
        &[Required(Number), Required(String), Optional(String)],
        String,
        |_, _| unsupported("format-number()"),
    );
    library.register("current", &[], NodeSet, |_, _| unsupported("current()"));
    library.register(
        "unparsed-entity-uri",
        &[Required(String)],
        String,
        |_, _| unsupported("unparsed-entity-uri()"),
    );
    library.register(
        "system-property",
        &[Required(String)],
        Object,
        |_, _| unsupported("system-property()"),
    );
    library
}

fn unsupported(name: &str) -> Result<Value, XPathError> {
    Err(XPathError::UnsupportedFeature(name.to_string()))
}

/// A stable, NCName-safe identifier per node: the first node in document
/// order of the argument, or the context node; empty for an empty set.
fn func_generate_id(
    ctx: &EvaluationContext<'_>,
    mut args: Vec<Value>,
) -> Result<Value, XPathError> {
    let node = if args.is_empty() {
        Some(ctx.context_node.clone())
    } else {
        args.remove(0).into_node_set("generate-id()")?.into_iter().next()
    };
    match node {
        Some(node) => {
            let mut hasher = DefaultHasher::new();
            node.hash(&mut hasher);
            Ok(Value::String(format!("id{:x}", hasher.finish())))
        }
        None => Ok(Value::String(String::new())),
    }
}
