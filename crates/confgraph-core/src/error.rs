//! Error types for confgraph-core.
//!
//! Every failure of a load is fatal and surfaces as one [`ConfigError`].
//! Each variant names the structural path (or file) involved and the
//! directive being processed, so the rendered message alone is enough to
//! find the offending spot.

use crate::path::Path;
use crate::registry::InvocationError;
use crate::types::DirectiveKind;
use confgraph_yaml::SourceInfo;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Coarse classification of a [`ConfigError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Include,
    Merge,
    Tag,
    Resolution,
    Permission,
    Construction,
    Override,
    Parse,
    Io,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{}`: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in `{name}`: {source}")]
    Parse {
        name: String,
        #[source]
        source: confgraph_yaml::Error,
    },

    #[error("include error at {path} ({directive}): {reason}")]
    Include {
        path: Path,
        directive: DirectiveKind,
        reason: IncludeFailure,
    },

    #[error("merge error at {path} ({directive}): {message}")]
    Merge {
        path: Path,
        directive: DirectiveKind,
        message: String,
    },

    #[error("invalid {tag} directive at {path}: {message}")]
    Tag {
        path: Path,
        tag: String,
        message: String,
        location: Option<SourceInfo>,
    },

    #[error("resolution error at {path} ({directive}): {reason}")]
    Resolution {
        path: Path,
        directive: DirectiveKind,
        reason: ResolutionFailure,
    },

    #[error("permission denied at {path} ({directive}): {denial}")]
    Permission {
        path: Path,
        directive: DirectiveKind,
        denial: PolicyDenial,
    },

    #[error("construction error at {path} ({directive}): {reason}")]
    Construction {
        path: Path,
        directive: DirectiveKind,
        reason: ConstructionFailure,
    },

    #[error("invalid override `{text}`: {message}")]
    Override { text: String, message: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Io { .. } => ErrorKind::Io,
            ConfigError::Parse { .. } => ErrorKind::Parse,
            ConfigError::Include { .. } => ErrorKind::Include,
            ConfigError::Merge { .. } => ErrorKind::Merge,
            ConfigError::Tag { .. } => ErrorKind::Tag,
            ConfigError::Resolution { .. } => ErrorKind::Resolution,
            ConfigError::Permission { .. } => ErrorKind::Permission,
            ConfigError::Construction { .. } => ErrorKind::Construction,
            ConfigError::Override { .. } => ErrorKind::Override,
        }
    }

    /// Structural path the error is attached to, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Include { path, .. }
            | ConfigError::Merge { path, .. }
            | ConfigError::Tag { path, .. }
            | ConfigError::Resolution { path, .. }
            | ConfigError::Permission { path, .. }
            | ConfigError::Construction { path, .. } => Some(path),
            ConfigError::Io { .. } | ConfigError::Parse { .. } | ConfigError::Override { .. } => {
                None
            }
        }
    }

    pub(crate) fn resolution(path: &Path, directive: DirectiveKind, reason: ResolutionFailure) -> Self {
        ConfigError::Resolution {
            path: path.clone(),
            directive,
            reason,
        }
    }

    pub(crate) fn include(path: &Path, directive: DirectiveKind, reason: IncludeFailure) -> Self {
        ConfigError::Include {
            path: path.clone(),
            directive,
            reason,
        }
    }

    pub(crate) fn tag(path: &Path, tag: impl Into<String>, message: impl Into<String>, location: &SourceInfo) -> Self {
        ConfigError::Tag {
            path: path.clone(),
            tag: tag.into(),
            message: message.into(),
            location: Some(location.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum IncludeFailure {
    #[error("include file not found: `{}`", .0.display())]
    NotFound(PathBuf),

    #[error("include cycle: {}", join_files(.0))]
    Cycle(Vec<PathBuf>),

    #[error(
        "keys of `{}` do not match the expected keys{}{}",
        .file.display(),
        list_suffix("missing", .missing),
        list_suffix("unexpected", .unexpected)
    )]
    KeyMismatch {
        file: PathBuf,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error(
        "unresolved reference(s) {} in include path `{template}`; available keys: [{}]",
        .missing.join(", "),
        .available.join(", ")
    )]
    UnresolvedPath {
        template: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("include path `{template}` may only contain bare references: {message}")]
    InvalidPath { template: String, message: String },

    #[error("included document `{}` is not a mapping", .0.display())]
    NotAMapping(PathBuf),

    #[error("invalid include entry: {0}")]
    InvalidEntry(String),
}

#[derive(Debug, Error)]
pub enum ResolutionFailure {
    #[error("undefined reference `{0}`")]
    Undefined(String),

    #[error("circular reference: {}", join_paths(.0))]
    Circular(Vec<Path>),

    #[error("no attribute `{attribute}` on {type_name} in `{reference}`")]
    MissingAttribute {
        reference: String,
        attribute: String,
        type_name: String,
    },

    #[error("index {index} out of range (length {len}) in `{reference}`")]
    IndexOutOfRange {
        reference: String,
        index: i64,
        len: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in `{0}`")]
    Overflow(String),

    #[error("invalid expression `{expression}`: {message}")]
    Syntax { expression: String, message: String },

    #[error("environment variable `{0}` is not set and no default was given")]
    EnvNotSet(String),

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Error)]
pub enum PolicyDenial {
    #[error("access to environment variable `{0}` is not allowed by the security policy")]
    Env(String),

    #[error("import of `{0}` is not allowed by the security policy")]
    Import(String),

    #[error("include of `{0}` is not allowed by the security policy")]
    Include(String),

    #[error("expression `{0}` is not allowed: expression evaluation is disabled by the security policy")]
    Expression(String),
}

#[derive(Debug, Error)]
pub enum ConstructionFailure {
    #[error("symbol `{name}` not found: unknown module `{module}`")]
    UnknownModule { name: String, module: String },

    #[error("symbol `{name}` not found: module `{module}` has no member `{member}`")]
    MissingMember {
        name: String,
        module: String,
        member: String,
    },

    #[error("`{target}` of type {type_name} is not callable")]
    NotCallable { target: String, type_name: String },

    #[error("call to `{target}` failed: {source}")]
    Invocation {
        target: String,
        #[source]
        source: InvocationError,
    },
}

fn join_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn join_paths(paths: &[Path]) -> String {
    paths
        .iter()
        .map(Path::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn list_suffix(label: &str, items: &[String]) -> String {
    if items.is_empty() {
        String::new()
    } else {
        format!("; {label}: [{}]", items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_path_and_directive() {
        let err = ConfigError::resolution(
            &Path::parse("x").unwrap(),
            DirectiveKind::Reference,
            ResolutionFailure::Circular(vec![
                Path::parse("x").unwrap(),
                Path::parse("y").unwrap(),
                Path::parse("x").unwrap(),
            ]),
        );
        assert_eq!(err.kind(), ErrorKind::Resolution);
        insta::assert_snapshot!(err.to_string(), @"resolution error at x (reference): circular reference: x -> y -> x");
    }

    #[test]
    fn test_key_mismatch_message() {
        let err = ConfigError::include(
            &Path::parse("a").unwrap(),
            DirectiveKind::IncludeFrom,
            IncludeFailure::KeyMismatch {
                file: PathBuf::from("parts.yml"),
                missing: vec!["b".into()],
                unexpected: vec!["c".into(), "d".into()],
            },
        );
        assert_eq!(err.kind(), ErrorKind::Include);
        insta::assert_snapshot!(err.to_string(), @"include error at a (!include_from): keys of `parts.yml` do not match the expected keys; missing: [b]; unexpected: [c, d]");
    }
}
