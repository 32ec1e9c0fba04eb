//! The `load` pipeline: sources → includes → merge → overrides → resolution.

use crate::convert::node_from_yaml;
use crate::error::{ConfigError, Result};
use crate::include::IncludeExpander;
use crate::merge::{finish, merge_value};
use crate::overrides::{DEFAULT_PREFIX, overrides_document, process_overrides};
use crate::path::Path;
use crate::registry::CapabilityRegistry;
use crate::resolve::{DEFAULT_MAX_DEPTH, ResolvedConfig, Resolver};
use crate::security::SecurityPolicy;
use crate::source::{DocumentSource, FileSystemSource};
use crate::types::Node;
use std::path::{Path as FsPath, PathBuf};
use tracing::debug;

/// One root document.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    File(PathBuf),
    /// In-memory text. Includes resolve against the directory part of `name`.
    Text { name: String, content: String },
}

impl Source {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Source::Text {
            name: name.into(),
            content: content.into(),
        }
    }

    fn name(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Text { name, .. } => name.clone(),
        }
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::File(path)
    }
}

impl From<&FsPath> for Source {
    fn from(path: &FsPath) -> Self {
        Source::File(path.to_path_buf())
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::File(PathBuf::from(path))
    }
}

pub struct LoadOptions {
    /// `prefix.path=value` strings applied after merging.
    pub overrides: Vec<String>,
    /// Also take overrides from the process arguments.
    pub use_process_args: bool,
    pub override_prefix: String,
    pub policy: SecurityPolicy,
    pub registry: CapabilityRegistry,
    pub max_depth: usize,
    pub documents: Box<dyn DocumentSource>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            overrides: Vec::new(),
            use_process_args: false,
            override_prefix: DEFAULT_PREFIX.to_string(),
            policy: SecurityPolicy::restrictive(),
            registry: CapabilityRegistry::with_builtins(),
            max_depth: DEFAULT_MAX_DEPTH,
            documents: Box::new(FileSystemSource),
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_override(mut self, text: impl Into<String>) -> Self {
        self.overrides.push(text.into());
        self
    }

    pub fn with_process_args(mut self, enabled: bool) -> Self {
        self.use_process_args = enabled;
        self
    }

    pub fn with_override_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.override_prefix = prefix.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_documents(mut self, documents: impl DocumentSource + 'static) -> Self {
        self.documents = Box::new(documents);
        self
    }

    fn all_overrides(&self) -> Vec<String> {
        let mut overrides = self.overrides.clone();
        if self.use_process_args {
            overrides.extend(process_overrides(&self.override_prefix));
        }
        overrides
    }
}

/// Load, merge and resolve `sources`; later sources win.
pub fn load<I, S>(sources: I, options: &LoadOptions) -> Result<ResolvedConfig>
where
    I: IntoIterator<Item = S>,
    S: Into<Source>,
{
    let sources: Vec<Source> = sources.into_iter().map(Into::into).collect();
    let merged = merge_sources(&sources, options)?;
    let tree = apply_overrides(merged, options)?;
    resolve_tree(&tree, options)
}

/// Include-process every source on its own, then merge them left to right.
pub fn merge_sources(sources: &[Source], options: &LoadOptions) -> Result<Node> {
    let mut merged = Node::empty_mapping();
    for source in sources {
        let (text, location) = match source {
            Source::File(path) => {
                let text = options.documents.read(path).map_err(|err| ConfigError::Io {
                    file: path.clone(),
                    source: err,
                })?;
                (text, path.clone())
            }
            Source::Text { name, content } => (content.clone(), PathBuf::from(name)),
        };
        let name = source.name();
        debug!(source = %name, "loading document");

        let yaml = confgraph_yaml::parse_file(&text, &name).map_err(|err| ConfigError::Parse {
            name: name.clone(),
            source: err,
        })?;
        let document = node_from_yaml(&yaml, &name)?;
        let outer = [merged.clone()];
        let expanded =
            IncludeExpander::new(options.documents.as_ref(), &options.policy).expand_root(document, Some(&location), &outer)?;
        merged = merge_value(Some(merged), expanded, &Path::root())?;
    }
    finish(merged, &Path::root())
}

/// Merge the overrides of `options` on top of a merged tree.
pub fn apply_overrides(tree: Node, options: &LoadOptions) -> Result<Node> {
    let overrides = options.all_overrides();
    if overrides.is_empty() {
        return Ok(tree);
    }
    let document = overrides_document(&overrides, &options.override_prefix)?;
    let outer = [tree.clone()];
    let document = IncludeExpander::new(options.documents.as_ref(), &options.policy).expand_root(document, None, &outer)?;
    finish(merge_value(Some(tree), document, &Path::root())?, &Path::root())
}

/// Resolve a merged tree.
pub fn resolve_tree(tree: &Node, options: &LoadOptions) -> Result<ResolvedConfig> {
    Resolver::new(tree, &options.policy, &options.registry)
        .with_max_depth(options.max_depth)
        .resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::source::MemorySource;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn options(documents: MemorySource) -> LoadOptions {
        LoadOptions::new()
            .with_policy(SecurityPolicy::permissive())
            .with_documents(documents)
    }

    #[test]
    fn test_later_sources_win() {
        let mut documents = MemorySource::new();
        documents
            .add("a.yml", "x: 1\nlist: [1]\nname: a")
            .add("b.yml", "x: 2\nlist: !extend [2]\nlabel: '${name}-${x}'");
        let resolved = load(["a.yml", "b.yml"], &options(documents)).unwrap();
        assert_eq!(
            serde_json::to_string(&resolved.config).unwrap(),
            r#"{"x":2,"list":[1,2],"name":"a","label":"a-2"}"#
        );
    }

    #[test]
    fn test_text_sources_and_overrides() {
        let mut documents = MemorySource::new();
        documents.add("conf/db.yml", "host: localhost\nport: 5432");
        let options = options(documents)
            .with_override("confgraph.db.port=6543")
            .with_override("confgraph.tags=!extend [b]");
        let resolved = load(
            [Source::text("conf/main.yml", "db: !include db.yml\ntags: [a]\nurl: '${db.host}:${db.port}'")],
            &options,
        )
        .unwrap();
        assert_eq!(resolved.get("url"), Some(&Value::from("localhost:6543")));
        assert_eq!(serde_json::to_string(resolved.get("tags").unwrap()).unwrap(), r#"["a","b"]"#);
    }

    #[test]
    fn test_later_source_include_path_sees_earlier_literals() {
        let mut documents = MemorySource::new();
        documents
            .add("base.yml", "stage: prod")
            .add("main.yml", "_s: !include_at ${stage}.yml")
            .add("prod.yml", "replicas: 3");
        let resolved = load(["base.yml", "main.yml"], &options(documents)).unwrap();
        assert_eq!(resolved.get("replicas"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_missing_root_file() {
        let err = load(["nope.yml"], &options(MemorySource::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_default_policy_is_restrictive() {
        let mut documents = MemorySource::new();
        documents.add("m.yml", "x: !@dict {a: 1}");
        let err = load(["m.yml"], &LoadOptions::new().with_documents(documents)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }
}
