//! Error types for synthesis

use thiserror::Error;

/// Result type alias for synthesis operations
pub type Result<T> = std::result::Result<T, SynthError>;

/// Errors that can occur while validating a definition or synthesizing stacks
#[derive(Debug, Error)]
pub enum SynthError {
    /// A branch pattern is not a valid regular expression
    #[error("Invalid branch pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An image tag does not follow the container tag grammar
    #[error("Invalid image tag '{0}'")]
    InvalidTag(String),

    /// A network range could not be parsed or has an unsupported prefix
    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    /// Two environments share the same name
    #[error("Duplicate environment '{0}'")]
    DuplicateEnvironment(String),

    /// Two resources in one template share a logical id
    #[error("Duplicate logical id '{0}' in template")]
    DuplicateLogicalId(String),

    /// Any other structural problem with the application definition
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// A stack was requested by name but is not part of the assembly
    #[error("Unknown stack '{0}'")]
    UnknownStack(String),

    /// Filesystem error while writing the cloud assembly
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization of a buildspec failed
    #[error("Buildspec serialization error: {0}")]
    Buildspec(#[from] serde_yaml::Error),
}

impl SynthError {
    /// Shorthand for an [`SynthError::InvalidDefinition`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidDefinition(message.into())
    }

    /// Check if this error comes from validating user input rather than I/O
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. }
                | Self::InvalidTag(_)
                | Self::InvalidCidr { .. }
                | Self::DuplicateEnvironment(_)
                | Self::InvalidDefinition(_)
        )
    }
}
