// Harness Error Taxonomy
// Every fatal condition the pipeline can hit. Public APIs return anyhow::Result
// and bail with one of these so callers can downcast to classify the failure.

/// Fatal harness errors
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Generator failed at index {index}: {source}")]
    Generation {
        index: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transform failed for item {index} in group '{group}': {source}")]
    Transform {
        group: String,
        index: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    Configuration { field: String, reason: String },

    #[error("Summarizer failed for group '{group}': {source}")]
    Summarizer {
        group: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Stats collector failed: {source}")]
    Sink {
        #[source]
        source: anyhow::Error,
    },
}

impl HarnessError {
    /// Shorthand for configuration errors raised at the boundary
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short, stable name of the error class for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Generation { .. } => "generation",
            HarnessError::Transform { .. } => "transform",
            HarnessError::Configuration { .. } => "configuration",
            HarnessError::Summarizer { .. } => "summarizer",
            HarnessError::Sink { .. } => "sink",
        }
    }
}

/// Find the harness error inside an anyhow chain, if there is one
pub fn classify(error: &anyhow::Error) -> Option<&HarnessError> {
    error.chain().find_map(|e| e.downcast_ref::<HarnessError>())
}
