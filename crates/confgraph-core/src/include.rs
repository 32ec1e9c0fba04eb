//! Include expansion.
//!
//! A document is processed in two steps:
//!
//! 1. every file listed under the reserved `include!` key is loaded, has
//!    its own includes processed relative to itself, and is merged left to
//!    right;
//! 2. the document's `!include`, `!include_at` and `!include_from` values
//!    are expanded in place, and the result is merged on top of step 1.
//!
//! File references may contain `${name}` spans. They are filled from values
//! that are already literal: the document itself, what its `include!`
//! list produced, and whatever the including documents saw.

use crate::convert::node_from_yaml;
use crate::error::{ConfigError, IncludeFailure, Result};
use crate::expr;
use crate::merge::{merge_entry, merge_value};
use crate::path::{Path, Segment};
use crate::security::SecurityPolicy;
use crate::source::{DocumentSource, resolve_relative};
use crate::types::{
    CallArgs, Directive, DirectiveKind, INCLUDE_KEY, IncludeMode, IncludeSpec, Node, NodeKind, SPLICE_KEY, Scalar,
};
use crate::value::Value;
use indexmap::IndexMap;
use std::path::{Path as FsPath, PathBuf};
use tracing::debug;

/// Expands includes for one load.
pub struct IncludeExpander<'a> {
    source: &'a dyn DocumentSource,
    policy: &'a SecurityPolicy,
    /// Files currently being processed, outermost first.
    stack: Vec<PathBuf>,
}

impl<'a> IncludeExpander<'a> {
    pub fn new(source: &'a dyn DocumentSource, policy: &'a SecurityPolicy) -> Self {
        Self {
            source,
            policy,
            stack: Vec::new(),
        }
    }

    /// Process a root document located at `file` (if it has a location).
    ///
    /// `outer` holds trees whose literal values dynamic include paths may
    /// use, most specific first.
    pub fn expand_root(&mut self, document: Node, file: Option<&FsPath>, outer: &[Node]) -> Result<Node> {
        if let Some(file) = file {
            self.stack.push(file.to_path_buf());
        }
        let result = self.expand_document(document, file, outer);
        if file.is_some() {
            self.stack.pop();
        }
        result
    }

    fn expand_document(&mut self, document: Node, file: Option<&FsPath>, outer: &[Node]) -> Result<Node> {
        let source_info = document.source_info.clone();
        let mut map = match document.kind {
            NodeKind::Mapping(map) => map,
            NodeKind::Scalar(Scalar::Null) => IndexMap::new(),
            kind => return Ok(Node::new(kind, source_info)),
        };

        let mut merged = Node::empty_mapping();
        if let Some(list) = map.shift_remove(INCLUDE_KEY) {
            let scope = scope_with(vec![Node::mapping(map.clone())], outer);
            for (i, entry) in include_entries(list)?.into_iter().enumerate() {
                let at = Path::from_keys([INCLUDE_KEY]).index(i);
                let Some(written) = entry.as_str() else {
                    return Err(ConfigError::include(
                        &at,
                        DirectiveKind::IncludeList,
                        IncludeFailure::InvalidEntry("expected a file path string".into()),
                    ));
                };
                let written = interpolate_path(written, &scope, &at, DirectiveKind::IncludeList)?;
                let (part, resolved) = self.load(&written, file, &at, DirectiveKind::IncludeList, &scope)?;
                if !part.is_mapping() {
                    return Err(ConfigError::include(
                        &at,
                        DirectiveKind::IncludeList,
                        IncludeFailure::NotAMapping(resolved),
                    ));
                }
                merged = merge_value(Some(merged), part, &at)?;
            }
        }

        let scope = scope_with(vec![Node::mapping(map.clone()), merged.clone()], outer);
        let expanded = self.expand_mapping(map, &Path::root(), file, &scope)?;
        merge_value(Some(merged), Node::new(NodeKind::Mapping(expanded), source_info), &Path::root())
    }

    fn expand_mapping(
        &mut self,
        map: IndexMap<String, Node>,
        at: &Path,
        file: Option<&FsPath>,
        scope: &[Node],
    ) -> Result<IndexMap<String, Node>> {
        let mut out = IndexMap::new();
        for (key, node) in map {
            let path = at.key(key.as_str());
            let spec = match node.as_directive() {
                Some(Directive::Include(spec)) if spec.mode != IncludeMode::Nested => Some(spec.clone()),
                _ => None,
            };
            let Some(spec) = spec else {
                let node = self.expand_node(node, &path, file, scope)?;
                merge_entry(&mut out, key, node, &path)?;
                continue;
            };

            let kind = spec.mode.kind();
            let written = interpolate_path(&spec.path, scope, &path, kind)?;
            let (document, resolved) = self.load(&written, file, &path, kind, scope)?;
            let NodeKind::Mapping(entries) = document.kind else {
                return Err(ConfigError::include(&path, kind, IncludeFailure::NotAMapping(resolved)));
            };
            let entries = if spec.mode == IncludeMode::From && key != SPLICE_KEY {
                select_keys(&key, entries, &resolved, &path)?
            } else {
                entries
            };
            debug!(file = %resolved.display(), at = %path, keys = entries.len(), "splicing included keys");
            for (spliced_key, value) in entries {
                let spliced_path = at.key(spliced_key.as_str());
                merge_entry(&mut out, spliced_key, value, &spliced_path)?;
            }
        }
        Ok(out)
    }

    fn expand_node(&mut self, node: Node, at: &Path, file: Option<&FsPath>, scope: &[Node]) -> Result<Node> {
        let Node { kind, source_info } = node;
        let kind = match kind {
            NodeKind::Scalar(_) => kind,
            NodeKind::Mapping(map) => NodeKind::Mapping(self.expand_mapping(map, at, file, scope)?),
            NodeKind::Sequence(items) => NodeKind::Sequence(self.expand_items(items, at, file, scope)?),
            NodeKind::Directive(directive) => match *directive {
                Directive::Include(IncludeSpec {
                    mode: IncludeMode::Nested,
                    path,
                }) => {
                    let written = interpolate_path(&path, scope, at, DirectiveKind::Include)?;
                    let (document, _) = self.load(&written, file, at, DirectiveKind::Include, scope)?;
                    return Ok(document);
                }
                Directive::Include(spec) => {
                    return Err(ConfigError::include(
                        at,
                        spec.mode.kind(),
                        IncludeFailure::InvalidEntry("positional includes are only allowed as mapping values".into()),
                    ));
                }
                Directive::Patch(map) => {
                    NodeKind::Directive(Box::new(Directive::Patch(self.expand_mapping(map, at, file, scope)?)))
                }
                Directive::Extend(items) => {
                    NodeKind::Directive(Box::new(Directive::Extend(self.expand_items(items, at, file, scope)?)))
                }
                Directive::Construct(mut call) => {
                    call.args = match call.args {
                        CallArgs::Positional(items) => CallArgs::Positional(self.expand_items(items, at, file, scope)?),
                        CallArgs::Keyword(map) => CallArgs::Keyword(self.expand_mapping(map, at, file, scope)?),
                        CallArgs::Single(node) => CallArgs::Single(Box::new(self.expand_node(*node, at, file, scope)?)),
                        CallArgs::None => CallArgs::None,
                    };
                    NodeKind::Directive(Box::new(Directive::Construct(call)))
                }
                other => NodeKind::Directive(Box::new(other)),
            },
        };
        Ok(Node::new(kind, source_info))
    }

    fn expand_items(&mut self, items: Vec<Node>, at: &Path, file: Option<&FsPath>, scope: &[Node]) -> Result<Vec<Node>> {
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| self.expand_node(item, &at.index(i), file, scope))
            .collect()
    }

    /// Read, parse and fully expand one included file.
    fn load(
        &mut self,
        written: &str,
        base: Option<&FsPath>,
        at: &Path,
        kind: DirectiveKind,
        scope: &[Node],
    ) -> Result<(Node, PathBuf)> {
        let resolved = resolve_relative(written, base);
        self.policy
            .check_include(written, &resolved)
            .map_err(|denial| ConfigError::Permission {
                path: at.clone(),
                directive: kind,
                denial,
            })?;

        if let Some(start) = self.stack.iter().position(|open| open == &resolved) {
            let mut cycle = self.stack[start..].to_vec();
            cycle.push(resolved);
            return Err(ConfigError::include(at, kind, IncludeFailure::Cycle(cycle)));
        }

        let text = self.source.read(&resolved).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ConfigError::include(at, kind, IncludeFailure::NotFound(resolved.clone()))
            } else {
                ConfigError::Io {
                    file: resolved.clone(),
                    source: err,
                }
            }
        })?;
        debug!(file = %resolved.display(), directive = %kind, at = %at, "loading included document");

        let name = resolved.display().to_string();
        let yaml = confgraph_yaml::parse_file(&text, &name).map_err(|source| ConfigError::Parse {
            name: name.clone(),
            source,
        })?;
        let document = node_from_yaml(&yaml, &name)?;

        self.stack.push(resolved.clone());
        let result = self.expand_document(document, Some(&resolved), scope);
        self.stack.pop();
        Ok((result?, resolved))
    }
}

fn scope_with(mut layers: Vec<Node>, outer: &[Node]) -> Vec<Node> {
    layers.extend(outer.iter().cloned());
    layers
}

fn include_entries(list: Node) -> Result<Vec<Node>> {
    match list.kind {
        NodeKind::Sequence(items) => Ok(items),
        NodeKind::Scalar(Scalar::Null) => Ok(Vec::new()),
        NodeKind::Scalar(Scalar::String(_)) => Ok(vec![list]),
        _ => Err(ConfigError::include(
            &Path::from_keys([INCLUDE_KEY]),
            DirectiveKind::IncludeList,
            IncludeFailure::InvalidEntry(format!("`{INCLUDE_KEY}` must be a list of file paths")),
        )),
    }
}

/// Keep the entries named by a `!include_from` key such as `a, b`.
///
/// Non-private keys of the file must be exactly the expected ones.
/// Private (`_`-prefixed) keys are allowed and dropped unless expected.
fn select_keys(
    key: &str,
    entries: IndexMap<String, Node>,
    file: &FsPath,
    at: &Path,
) -> Result<IndexMap<String, Node>> {
    let expected: Vec<&str> = key.split(',').map(str::trim).filter(|k| !k.is_empty()).collect();
    let missing: Vec<String> = expected
        .iter()
        .filter(|k| !entries.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    let mut unexpected: Vec<String> = entries
        .keys()
        .filter(|k| !k.starts_with('_') && !expected.contains(&k.as_str()))
        .cloned()
        .collect();
    unexpected.sort();

    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ConfigError::include(
            at,
            DirectiveKind::IncludeFrom,
            IncludeFailure::KeyMismatch {
                file: file.to_path_buf(),
                missing,
                unexpected,
            },
        ));
    }
    Ok(entries
        .into_iter()
        .filter(|(k, _)| expected.contains(&k.as_str()))
        .collect())
}

/// Fill `${name}` spans of an include path from literal values in `scope`.
fn interpolate_path(template: &str, scope: &[Node], at: &Path, kind: DirectiveKind) -> Result<String> {
    let pieces = match expr::scan(template) {
        expr::Template::Literal(text) => return Ok(text),
        expr::Template::Whole(source) => vec![expr::Piece::Expr(source)],
        expr::Template::Parts(pieces) => pieces,
    };

    let mut out = String::new();
    let mut missing = Vec::new();
    for piece in pieces {
        let source = match piece {
            expr::Piece::Text(text) => {
                out.push_str(&text);
                continue;
            }
            expr::Piece::Expr(source) => source,
        };
        let path = expr::parse(&source).ok().and_then(|e| e.reference_path());
        let Some(path) = path else {
            return Err(ConfigError::include(
                at,
                kind,
                IncludeFailure::InvalidPath {
                    template: template.to_string(),
                    message: format!("`{source}` is not a plain reference"),
                },
            ));
        };
        match scope.iter().find_map(|layer| literal_at(layer, &path)) {
            Some(value) => out.push_str(&value.to_text()),
            None => missing.push(source),
        }
    }

    if missing.is_empty() {
        return Ok(out);
    }
    let mut available: Vec<String> = Vec::new();
    for layer in scope {
        for key in layer.as_mapping().into_iter().flat_map(IndexMap::keys) {
            if !available.contains(key) {
                available.push(key.clone());
            }
        }
    }
    Err(ConfigError::include(
        at,
        kind,
        IncludeFailure::UnresolvedPath {
            template: template.to_string(),
            missing,
            available,
        },
    ))
}

/// The scalar at `path`, if it is already a literal.
fn literal_at(root: &Node, path: &Path) -> Option<Value> {
    let mut node = root;
    for segment in path.segments() {
        node = match (segment, &node.kind) {
            (Segment::Key(key), NodeKind::Mapping(map)) => map.get(key)?,
            (Segment::Index(i), NodeKind::Sequence(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    match &node.kind {
        NodeKind::Scalar(Scalar::String(text)) if !expr::scan(text).is_literal() => None,
        NodeKind::Scalar(scalar) => Some(Value::from(scalar)),
        _ => None,
    }
}
