//! The unresolved document tree.
//!
//! A [`Node`] is what the merge engine works on: plain YAML structure plus
//! [`Directive`]s for every tag the engine understands. Nothing here is
//! evaluated yet; environment reads, imports and constructions stay as
//! directives until the resolver visits them.

use confgraph_yaml::SourceInfo;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt;

/// Reserved mapping key listing files to merge underneath a document.
pub const INCLUDE_KEY: &str = "include!";

/// Key of a positional include that splices the whole file.
pub const SPLICE_KEY: &str = "_";

/// Keyword argument that names a constructed instance.
pub const ID_KEY: &str = "id";

/// A node of the unresolved tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub source_info: SourceInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Scalar(Scalar),
    Sequence(Vec<Node>),
    Mapping(IndexMap<String, Node>),
    Directive(Box<Directive>),
}

/// A typed leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A tagged instruction embedded in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `!extend [..]`: append to the sequence merged so far.
    Extend(Vec<Node>),

    /// `!patch {..}`: replace the mapping merged so far.
    Patch(IndexMap<String, Node>),

    /// `!env NAME` or `!env {var: NAME, default: ..}`.
    Env {
        var: String,
        default: Option<Box<Node>>,
    },

    /// `!import dotted.name`: the symbol itself, not called.
    Import(String),

    /// `!include`, `!include_at`, `!include_from`. Expanded during merge.
    Include(IncludeSpec),

    /// `!@name` and `!$template`.
    Construct(CallSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeMode {
    /// The file becomes the value of the key.
    Nested,
    /// The file's top-level keys replace the key.
    At,
    /// The file's top-level keys named by the key replace it.
    From,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeSpec {
    pub mode: IncludeMode,
    /// File reference as written; may contain `${..}` references.
    pub path: String,
}

/// A construction or invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSpec {
    pub target: CallTarget,
    pub args: CallArgs,
    /// Alias registered for the produced instance.
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// `!@pkg.Name`
    Static(String),
    /// `!$...`
    Dynamic(NameTemplate),
}

/// Name of a dynamic construction.
#[derive(Debug, Clone, PartialEq)]
pub enum NameTemplate {
    /// `!$@ref` or `!$@ref.member`: the name starts with a config reference.
    Reference(Vec<String>),
    /// `!$pkg.@ref.Name`: dotted name with `@ident` segments substituted.
    Parts(Vec<NamePart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamePart {
    Text(String),
    Reference(String),
}

/// Exactly one argument shape per call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    None,
    Positional(Vec<Node>),
    Keyword(IndexMap<String, Node>),
    Single(Box<Node>),
}

/// What kind of directive an error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    IncludeList,
    Include,
    IncludeAt,
    IncludeFrom,
    Extend,
    Patch,
    Env,
    Import,
    Construct,
    DynamicConstruct,
    Reference,
    Expression,
    Override,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DirectiveKind::IncludeList => "include!",
            DirectiveKind::Include => "!include",
            DirectiveKind::IncludeAt => "!include_at",
            DirectiveKind::IncludeFrom => "!include_from",
            DirectiveKind::Extend => "!extend",
            DirectiveKind::Patch => "!patch",
            DirectiveKind::Env => "!env",
            DirectiveKind::Import => "!import",
            DirectiveKind::Construct => "!@",
            DirectiveKind::DynamicConstruct => "!$",
            DirectiveKind::Reference => "reference",
            DirectiveKind::Expression => "expression",
            DirectiveKind::Override => "override",
        };
        f.write_str(text)
    }
}

impl IncludeMode {
    pub fn kind(self) -> DirectiveKind {
        match self {
            IncludeMode::Nested => DirectiveKind::Include,
            IncludeMode::At => DirectiveKind::IncludeAt,
            IncludeMode::From => DirectiveKind::IncludeFrom,
        }
    }
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::Extend(_) => DirectiveKind::Extend,
            Directive::Patch(_) => DirectiveKind::Patch,
            Directive::Env { .. } => DirectiveKind::Env,
            Directive::Import(_) => DirectiveKind::Import,
            Directive::Include(spec) => spec.mode.kind(),
            Directive::Construct(call) => match call.target {
                CallTarget::Static(_) => DirectiveKind::Construct,
                CallTarget::Dynamic(_) => DirectiveKind::DynamicConstruct,
            },
        }
    }

    /// The tag this directive was written with, e.g. `!@pkg.Name`.
    pub fn tag(&self) -> String {
        match self {
            Directive::Construct(call) => match &call.target {
                CallTarget::Static(name) => format!("!@{name}"),
                CallTarget::Dynamic(template) => format!("!${template}"),
            },
            other => other.kind().to_string(),
        }
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameTemplate::Reference(segments) => write!(f, "@{}", segments.join(".")),
            NameTemplate::Parts(parts) => {
                for part in parts {
                    match part {
                        NamePart::Text(text) => f.write_str(text)?,
                        NamePart::Reference(name) => write!(f, "@{name}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl Node {
    pub fn new(kind: NodeKind, source_info: SourceInfo) -> Self {
        Self { kind, source_info }
    }

    pub fn scalar(scalar: Scalar) -> Self {
        Self::new(NodeKind::Scalar(scalar), SourceInfo::default())
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::scalar(Scalar::String(text.into()))
    }

    pub fn mapping(entries: IndexMap<String, Node>) -> Self {
        Self::new(NodeKind::Mapping(entries), SourceInfo::default())
    }

    pub fn sequence(items: Vec<Node>) -> Self {
        Self::new(NodeKind::Sequence(items), SourceInfo::default())
    }

    pub fn directive(directive: Directive, source_info: SourceInfo) -> Self {
        Self::new(NodeKind::Directive(Box::new(directive)), source_info)
    }

    pub fn empty_mapping() -> Self {
        Self::mapping(IndexMap::new())
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Node>> {
        match &self.kind {
            NodeKind::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut IndexMap<String, Node>> {
        match &mut self.kind {
            NodeKind::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_directive(&self) -> Option<&Directive> {
        match &self.kind {
            NodeKind::Directive(directive) => Some(directive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Scalar(Scalar::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.kind, NodeKind::Mapping(_))
    }

    /// Mapping lookup.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping()?.get(key)
    }

    /// True when the subtree contains no directive at all.
    pub fn is_plain(&self) -> bool {
        match &self.kind {
            NodeKind::Scalar(_) => true,
            NodeKind::Sequence(items) => items.iter().all(Node::is_plain),
            NodeKind::Mapping(map) => map.values().all(Node::is_plain),
            NodeKind::Directive(_) => false,
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Int(i) => serializer.serialize_i64(*i),
            Scalar::Float(f) => serializer.serialize_f64(*f),
            Scalar::String(s) => serializer.serialize_str(s),
        }
    }
}

/// Directives serialise as a one-entry mapping from their tag to their payload.
impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.kind {
            NodeKind::Scalar(scalar) => scalar.serialize(serializer),
            NodeKind::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            NodeKind::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            NodeKind::Directive(directive) => {
                let mut out = serializer.serialize_map(Some(1))?;
                out.serialize_entry(&directive.tag(), &DirectivePayload(directive))?;
                out.end()
            }
        }
    }
}

struct DirectivePayload<'a>(&'a Directive);

impl Serialize for DirectivePayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Directive::Extend(items) => items.serialize(serializer),
            Directive::Patch(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Directive::Env { var, default: None } => serializer.serialize_str(var),
            Directive::Env {
                var,
                default: Some(default),
            } => {
                let mut out = serializer.serialize_map(Some(2))?;
                out.serialize_entry("var", var)?;
                out.serialize_entry("default", default.as_ref())?;
                out.end()
            }
            Directive::Import(name) => serializer.serialize_str(name),
            Directive::Include(spec) => serializer.serialize_str(&spec.path),
            Directive::Construct(call) => {
                let mut out = serializer.serialize_map(None)?;
                if let Some(id) = &call.id {
                    out.serialize_entry(ID_KEY, id)?;
                }
                match &call.args {
                    CallArgs::None => {}
                    CallArgs::Positional(items) => out.serialize_entry("args", items)?,
                    CallArgs::Keyword(map) => {
                        for (key, value) in map {
                            out.serialize_entry(key, value)?;
                        }
                    }
                    CallArgs::Single(node) => out.serialize_entry("args", &[node.as_ref()])?,
                }
                out.end()
            }
        }
    }
}
