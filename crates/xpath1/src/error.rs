use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum XPathError {
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("Namespace prefix '{0}' redefined with a conflicting URI")]
    RedefinedNamespacePrefix(String),

    #[error("XPath syntax error in '{0}': {1}")]
    Syntax(String, String),

    #[error("Variable '${0}' is not bound in this context")]
    UnboundVariable(String),

    #[error("Unknown XPath function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' called with {got} arguments, expected {expected}")]
    ArgumentArity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
}
