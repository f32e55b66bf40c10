use thiserror::Error;
use xylem_xpath1::XPathError;

#[derive(Error, Debug)]
pub enum XsltError {
    #[error("XPath error: {0}")]
    XPath(#[from] XPathError),

    #[error("Stylesheet compilation error: {0}")]
    Compile(String),

    #[error("Template execution error: {0}")]
    Execution(String),

    #[error("{count} templates match {node} at priority {priority}")]
    AmbiguousTemplate {
        node: String,
        priority: f64,
        count: usize,
    },

    #[error("Unsupported XSLT feature: {0}")]
    UnsupportedFeature(String),

    #[error("Output serialisation error: {0}")]
    Serialize(String),
}

impl XsltError {
    /// Whether the error marks a feature outside the minimal core rather
    /// than a genuine failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            XsltError::UnsupportedFeature(_)
                | XsltError::XPath(XPathError::UnsupportedFeature(_))
        )
    }
}
