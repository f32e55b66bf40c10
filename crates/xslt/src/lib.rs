//! A minimal XSLT 1.0 driver over the xylem XPath engine: template
//! matching by pattern, priority resolution and result-tree construction,
//! all driven through repeated XPath evaluations.

pub mod ast;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod functions;
pub mod output;
pub mod pattern;

pub use ast::{CompiledStylesheet, XSL_NS};
pub use error::XsltError;
pub use executor::TemplateExecutor;
pub use output::{OutputItem, serialize, serialize_document};

use xylem_xpath1::{Document, NodeTree, StripPolicy, strip_whitespace};

/// Compiles a stylesheet and transforms the input document into output
/// items.
pub fn transform_to_items(
    stylesheet_source: &str,
    input_source: &str,
) -> Result<Vec<OutputItem>, XsltError> {
    let sheet = compiler::compile(stylesheet_source)?;
    let mut tree = NodeTree::parse(input_source)?;
    if !sheet.strip_space.is_empty() {
        strip_whitespace(
            &mut tree,
            &StripPolicy::listed(sheet.strip_space.clone(), sheet.preserve_space.clone()),
        );
    }
    let document = tree.into_document();
    let mut executor = TemplateExecutor::new(&sheet, &document);
    executor.transform()
}

/// End-to-end convenience: stylesheet + input → serialised result.
pub fn transform(stylesheet_source: &str, input_source: &str) -> Result<String, XsltError> {
    let items = transform_to_items(stylesheet_source, input_source)?;
    output::serialize(&items)
}

/// Re-parse and canonically serialise an XML document, so two serialised
/// forms can be compared structurally.
pub fn canonicalize(source: &str) -> Result<String, XsltError> {
    let document = Document::parse(source)?;
    serialize_document(&document)
}
