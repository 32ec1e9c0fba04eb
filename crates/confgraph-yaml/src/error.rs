//! Error types for YAML parsing.

use crate::SourceInfo;
use thiserror::Error;

/// Result type alias for confgraph-yaml operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building a [`crate::TaggedYaml`] tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The scanner rejected the input.
    #[error("YAML syntax error: {message}")]
    Syntax {
        message: String,
        location: Option<SourceInfo>,
    },

    /// An alias referred to an anchor that was never defined.
    #[error("unknown YAML anchor (id {anchor}) at {location}")]
    UnknownAnchor { anchor: usize, location: SourceInfo },

    /// The event stream did not describe a well-formed tree.
    #[error("invalid YAML structure: {message}")]
    InvalidStructure {
        message: String,
        location: Option<SourceInfo>,
    },
}

impl Error {
    /// Attach a file name to the location carried by this error, if any.
    pub fn with_file(self, file: &str) -> Self {
        match self {
            Error::Syntax { message, location } => Error::Syntax {
                message,
                location: location.map(|l| l.with_file(file)),
            },
            Error::UnknownAnchor { anchor, location } => Error::UnknownAnchor {
                anchor,
                location: location.with_file(file),
            },
            Error::InvalidStructure { message, location } => Error::InvalidStructure {
                message,
                location: location.map(|l| l.with_file(file)),
            },
        }
    }
}

impl From<yaml_rust2::ScanError> for Error {
    fn from(err: yaml_rust2::ScanError) -> Self {
        Error::Syntax {
            message: err.to_string(),
            location: None,
        }
    }
}
