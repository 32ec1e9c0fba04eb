//! Dependency-ordered resolution of a merged tree.
//!
//! Resolution is on demand: resolving a node first resolves whatever its
//! expressions and construction arguments reference, each exactly once.
//! Results are memoised per [`Path`], so a value needed twice is the same
//! value (and a constructed instance the same instance) both times. A path
//! requested while it is still being resolved is a circular reference.
//!
//! A reference walks the merged tree through mappings and sequences. When
//! it reaches a directive or a scalar before its last segment, that node is
//! resolved and the rest of the reference navigates the value (attributes
//! of an instance, keys of a computed mapping). A first segment that is not
//! a top-level key names an instance alias (`id:` of a construction).

mod construct;

use crate::error::{ConfigError, IncludeFailure, ResolutionFailure, Result};
use crate::expr::{self, Piece, Scope, Template, attribute_value, index_value};
use crate::path::{Path, Segment};
use crate::registry::CapabilityRegistry;
use crate::security::SecurityPolicy;
use crate::types::{CallArgs, Directive, DirectiveKind, Node, NodeKind, Scalar};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::{debug, trace};

pub const DEFAULT_MAX_DEPTH: usize = 256;

/// A fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Value,
    /// Every constructed instance, by the path of its directive.
    pub instances: IndexMap<Path, Value>,
    /// Instances registered under an explicit `id`.
    pub aliases: IndexMap<String, Value>,
}

impl ResolvedConfig {
    /// Value at a dotted path of mapping keys.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        self.config.get_path(dotted)
    }

    /// Instance registered under `id`.
    pub fn instance(&self, id: &str) -> Option<&Value> {
        self.aliases.get(id)
    }
}

pub struct Resolver<'a> {
    root: &'a Node,
    policy: &'a SecurityPolicy,
    registry: &'a CapabilityRegistry,
    max_depth: usize,
    memo: HashMap<Path, Value>,
    /// Paths being resolved, outermost first.
    in_progress: IndexSet<Path>,
    /// `id` → path of the construction that declares it.
    aliases: IndexMap<String, Path>,
    instances: IndexMap<Path, Value>,
}

impl<'a> Resolver<'a> {
    pub fn new(root: &'a Node, policy: &'a SecurityPolicy, registry: &'a CapabilityRegistry) -> Self {
        let mut aliases = IndexMap::new();
        collect_aliases(root, &Path::root(), &mut aliases);
        Self {
            root,
            policy,
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
            memo: HashMap::new(),
            in_progress: IndexSet::new(),
            aliases,
            instances: IndexMap::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve the whole tree.
    pub fn resolve(mut self) -> Result<ResolvedConfig> {
        let root = self.root;
        let config = self.resolve_at(root, &Path::root())?;
        let aliases = self
            .aliases
            .iter()
            .filter_map(|(id, path)| Some((id.clone(), self.instances.get(path)?.clone())))
            .collect();
        Ok(ResolvedConfig {
            config,
            instances: self.instances,
            aliases,
        })
    }

    /// Resolve a single reference such as `a.b[0].c`, and whatever it needs.
    pub fn value_at(&mut self, path: &Path) -> Result<Value> {
        let at = self.in_progress.last().cloned().unwrap_or_default();
        let Some(first) = path.first_key() else {
            return Err(undefined(&at, path));
        };

        if self.root.get(first).is_some() {
            return self.lookup_in_tree(path, &at);
        }
        let Some(alias_path) = self.aliases.get(first).cloned() else {
            return Err(undefined(&at, path));
        };
        let Some(node) = node_through_calls(self.root, &alias_path) else {
            return Err(undefined(&at, path));
        };
        let value = self.resolve_at(node, &alias_path)?;
        navigate(value, &path.segments()[1..], path, &at)
    }

    fn lookup_in_tree(&mut self, path: &Path, at: &Path) -> Result<Value> {
        let mut node = self.root;
        let mut walked = 0;
        for segment in path.segments() {
            let next = match (&node.kind, segment) {
                (NodeKind::Mapping(map), Segment::Key(key)) => match map.get(key) {
                    Some(child) => child,
                    None => return Err(undefined(at, path)),
                },
                (NodeKind::Sequence(items), Segment::Index(i)) => match items.get(*i) {
                    Some(child) => child,
                    None => {
                        return Err(ConfigError::resolution(
                            at,
                            DirectiveKind::Reference,
                            ResolutionFailure::IndexOutOfRange {
                                reference: path.to_string(),
                                index: i64::try_from(*i).unwrap_or(i64::MAX),
                                len: items.len(),
                            },
                        ));
                    }
                },
                _ => break,
            };
            node = next;
            walked += 1;
        }
        let prefix = Path::from_segments(path.segments()[..walked].to_vec());
        let value = self.resolve_at(node, &prefix)?;
        navigate(value, &path.segments()[walked..], path, at)
    }

    fn resolve_at(&mut self, node: &'a Node, at: &Path) -> Result<Value> {
        if let Some(value) = self.memo.get(at) {
            trace!(path = %at, "memoised");
            return Ok(value.clone());
        }
        if let Some(start) = self.in_progress.get_index_of(at) {
            let mut chain: Vec<Path> = self.in_progress.iter().skip(start).cloned().collect();
            chain.push(at.clone());
            return Err(ConfigError::resolution(
                at,
                DirectiveKind::Reference,
                ResolutionFailure::Circular(chain),
            ));
        }
        if self.in_progress.len() >= self.max_depth {
            return Err(ConfigError::resolution(
                at,
                DirectiveKind::Reference,
                ResolutionFailure::TooDeep(self.max_depth),
            ));
        }

        trace!(path = %at, "resolving");
        self.in_progress.insert(at.clone());
        let result = self.resolve_node(node, at);
        self.in_progress.pop();
        let value = result?;
        self.memo.insert(at.clone(), value.clone());
        Ok(value)
    }

    fn resolve_node(&mut self, node: &'a Node, at: &Path) -> Result<Value> {
        match &node.kind {
            NodeKind::Scalar(Scalar::String(text)) => self.resolve_text(text, at),
            NodeKind::Scalar(scalar) => Ok(Value::from(scalar)),
            NodeKind::Sequence(items) => self.resolve_items(items, at).map(Value::List),
            NodeKind::Mapping(map) => self.resolve_map(map, at).map(Value::Map),
            NodeKind::Directive(directive) => self.resolve_directive(directive, at),
        }
    }

    fn resolve_items(&mut self, items: &'a [Node], at: &Path) -> Result<Vec<Value>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.resolve_at(item, &at.index(i)))
            .collect()
    }

    fn resolve_map(&mut self, map: &'a IndexMap<String, Node>, at: &Path) -> Result<IndexMap<String, Value>> {
        let mut out = IndexMap::with_capacity(map.len());
        for (key, value) in map {
            let resolved = self.resolve_at(value, &at.key(key.as_str()))?;
            out.insert(key.clone(), resolved);
        }
        Ok(out)
    }

    fn resolve_directive(&mut self, directive: &'a Directive, at: &Path) -> Result<Value> {
        match directive {
            Directive::Env { var, default } => self.resolve_env(var, default.as_deref(), at),
            Directive::Import(name) => {
                let symbol = self.symbol(name, at, DirectiveKind::Import)?;
                debug!(path = %at, name = %name, "imported symbol");
                Ok(Value::Symbol(symbol))
            }
            Directive::Construct(call) => self.construct(call, at),
            Directive::Patch(map) => self.resolve_map(map, at).map(Value::Map),
            Directive::Extend(items) => self.resolve_items(items, at).map(Value::List),
            Directive::Include(spec) => Err(ConfigError::include(
                at,
                spec.mode.kind(),
                IncludeFailure::InvalidEntry("include was not expanded before resolution".into()),
            )),
        }
    }

    fn resolve_env(&mut self, var: &str, default: Option<&'a Node>, at: &Path) -> Result<Value> {
        self.policy
            .check_env(var)
            .map_err(|denial| permission(at, DirectiveKind::Env, denial))?;
        match std::env::var(var) {
            Ok(value) => {
                debug!(path = %at, var, "read environment variable");
                Ok(Value::String(value))
            }
            Err(_) => match default {
                Some(node) => self.resolve_node(node, at),
                None => Err(ConfigError::resolution(
                    at,
                    DirectiveKind::Env,
                    ResolutionFailure::EnvNotSet(var.to_string()),
                )),
            },
        }
    }

    fn resolve_text(&mut self, text: &str, at: &Path) -> Result<Value> {
        match expr::scan(text) {
            Template::Literal(text) => Ok(Value::String(text)),
            Template::Whole(source) => self.evaluate_span(&source, at),
            Template::Parts(pieces) => {
                let mut out = String::new();
                for piece in pieces {
                    match piece {
                        Piece::Text(text) => out.push_str(&text),
                        Piece::Expr(source) => out.push_str(&self.evaluate_span(&source, at)?.to_text()),
                    }
                }
                Ok(Value::String(out))
            }
        }
    }

    fn evaluate_span(&mut self, source: &str, at: &Path) -> Result<Value> {
        let parsed = expr::parse(source).map_err(|err| {
            ConfigError::resolution(
                at,
                DirectiveKind::Expression,
                ResolutionFailure::Syntax {
                    expression: source.to_string(),
                    message: err.to_string(),
                },
            )
        })?;
        if !parsed.is_bare_reference() {
            self.policy
                .check_expression(source)
                .map_err(|denial| permission(at, DirectiveKind::Expression, denial))?;
        }
        expr::evaluate(&parsed, source, self, at)
    }
}

impl Scope for Resolver<'_> {
    fn lookup(&mut self, path: &Path) -> Result<Value> {
        self.value_at(path)
    }
}

fn undefined(at: &Path, reference: &Path) -> ConfigError {
    ConfigError::resolution(
        at,
        DirectiveKind::Reference,
        ResolutionFailure::Undefined(reference.to_string()),
    )
}

fn permission(at: &Path, directive: DirectiveKind, denial: crate::error::PolicyDenial) -> ConfigError {
    ConfigError::Permission {
        path: at.clone(),
        directive,
        denial,
    }
}

/// Apply the remaining segments of `reference` to an already resolved value.
fn navigate(value: Value, rest: &[Segment], reference: &Path, at: &Path) -> Result<Value> {
    let text = reference.to_string();
    rest.iter()
        .try_fold(value, |value, segment| match segment {
            Segment::Key(key) => attribute_value(&value, key, &text),
            Segment::Index(i) => index_value(&value, &Value::Int(i64::try_from(*i).unwrap_or(i64::MAX)), &text),
        })
        .map_err(|reason| ConfigError::resolution(at, DirectiveKind::Reference, reason))
}

/// Record the path of every construction carrying an `id`. Later
/// declarations of the same id win.
fn collect_aliases(node: &Node, at: &Path, out: &mut IndexMap<String, Path>) {
    match &node.kind {
        NodeKind::Scalar(_) => {}
        NodeKind::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_aliases(item, &at.index(i), out);
            }
        }
        NodeKind::Mapping(map) => {
            for (key, value) in map {
                collect_aliases(value, &at.key(key.as_str()), out);
            }
        }
        NodeKind::Directive(directive) => {
            let Directive::Construct(call) = directive.as_ref() else {
                return;
            };
            if let Some(id) = &call.id {
                out.shift_remove(id);
                out.insert(id.clone(), at.clone());
            }
            match &call.args {
                CallArgs::Positional(items) => {
                    for (i, item) in items.iter().enumerate() {
                        collect_aliases(item, &at.index(i), out);
                    }
                }
                CallArgs::Keyword(map) => {
                    for (key, value) in map {
                        collect_aliases(value, &at.key(key.as_str()), out);
                    }
                }
                CallArgs::Single(_) | CallArgs::None => {}
            }
        }
    }
}

/// Like a plain tree walk, but also steps into construction arguments.
fn node_through_calls<'n>(root: &'n Node, path: &Path) -> Option<&'n Node> {
    path.segments().iter().try_fold(root, |node, segment| match (&node.kind, segment) {
        (NodeKind::Mapping(map), Segment::Key(key)) => map.get(key),
        (NodeKind::Sequence(items), Segment::Index(i)) => items.get(*i),
        (NodeKind::Directive(directive), segment) => match (directive.as_ref(), segment) {
            (Directive::Construct(call), Segment::Key(key)) => match &call.args {
                CallArgs::Keyword(map) => map.get(key),
                _ => None,
            },
            (Directive::Construct(call), Segment::Index(i)) => match &call.args {
                CallArgs::Positional(items) => items.get(*i),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::node_from_yaml;
    use crate::error::{ErrorKind, PolicyDenial};
    use crate::merge::settle;
    use crate::registry::{Arguments, InvocationError};
    use pretty_assertions::assert_eq;

    fn tree(text: &str) -> Node {
        settle(node_from_yaml(&confgraph_yaml::parse(text).unwrap(), "test.yml").unwrap())
    }

    fn resolve_with(text: &str, policy: &SecurityPolicy, registry: &CapabilityRegistry) -> Result<ResolvedConfig> {
        let root = tree(text);
        Resolver::new(&root, policy, registry).resolve()
    }

    fn resolve(text: &str) -> Result<ResolvedConfig> {
        resolve_with(text, &SecurityPolicy::permissive(), &CapabilityRegistry::with_builtins())
    }

    fn json(value: &Value) -> String {
        serde_json::to_string(value).unwrap()
    }

    #[test]
    fn test_whole_value_keeps_type() {
        let resolved = resolve("a: {b: 5}\nc: ${a.b}\nd: 'val=${a.b}'\ne: ${a}\nf: '${missing_ok}'\nmissing_ok: null").unwrap();
        assert_eq!(resolved.get("c"), Some(&Value::Int(5)));
        assert_eq!(resolved.get("d"), Some(&Value::from("val=5")));
        assert_eq!(json(resolved.get("e").unwrap()), r#"{"b":5}"#);
        assert_eq!(resolved.get("f"), Some(&Value::Null));
    }

    #[test]
    fn test_null_and_floats_in_text() {
        let resolved = resolve("n: null\nf: 2.0\nb: true\nl: [1, x]\nt: '${n}/${f}/${b}/${l}'").unwrap();
        assert_eq!(resolved.get("t"), Some(&Value::from(r#"null/2.0/true/[1,"x"]"#)));
    }

    #[test]
    fn test_forward_references_and_expressions() {
        let resolved = resolve(
            "total: ${train.epochs * train.steps}\n\
             label: '${name if train.epochs > 5 else \"short\"}'\n\
             name: long\n\
             train: {epochs: 10, steps: '${base_steps}'}\n\
             base_steps: 100\n\
             first: ${items[0]}\n\
             items: ['${base_steps}', 2]",
        )
        .unwrap();
        assert_eq!(resolved.get("total"), Some(&Value::Int(1000)));
        assert_eq!(resolved.get("label"), Some(&Value::from("long")));
        assert_eq!(resolved.get("first"), Some(&Value::Int(100)));
    }

    #[test]
    fn test_circular_reference() {
        let err = resolve("x: ${y}\ny: ${x}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
        insta::assert_snapshot!(err.to_string(), @"resolution error at x (reference): circular reference: x -> y -> x");

        let err = resolve("a: {b: '${a}'}").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Resolution {
                reason: ResolutionFailure::Circular(_),
                ..
            }
        ));
    }

    #[test]
    fn test_undefined_reference() {
        let err = resolve("a: {x: 1}\nb: {c: '${a.nope}'}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at b.c (reference): undefined reference `a.nope`");

        let err = resolve("b: ${ghost.x}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at b (reference): undefined reference `ghost.x`");

        let err = resolve("a: [1]\nb: ${a[3]}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at b (reference): index 3 out of range (length 1) in `a[3]`");
    }

    #[test]
    fn test_expression_errors() {
        let err = resolve("a: 1\nb: ${a / 0}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at b (expression): division by zero");

        let err = resolve("b: ${1 +}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at b (expression): invalid expression `1 +`: unexpected end of expression at offset 3");
    }

    #[test]
    fn test_expression_gate() {
        let policy = SecurityPolicy::permissive().with_expressions(false);
        let registry = CapabilityRegistry::new();
        let resolved = resolve_with("a: 2\nb: ${a}\nc: 'x${a}'", &policy, &registry).unwrap();
        assert_eq!(resolved.get("c"), Some(&Value::from("x2")));

        let err = resolve_with("a: 2\nb: ${a * 2}", &policy, &registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        insta::assert_snapshot!(err.to_string(), @"permission denied at b (expression): expression `a * 2` is not allowed: expression evaluation is disabled by the security policy");
    }

    #[test]
    fn test_env() {
        // SAFETY: the variable names are unique to this test.
        unsafe {
            std::env::set_var("CONFGRAPH_RESOLVE_TEST_HOST", "db.internal");
            std::env::remove_var("CONFGRAPH_RESOLVE_TEST_UNSET");
        }
        let resolved = resolve(
            "host: !env CONFGRAPH_RESOLVE_TEST_HOST\n\
             port: !env {var: CONFGRAPH_RESOLVE_TEST_UNSET, default: 5432}\n\
             lazy: !env {var: CONFGRAPH_RESOLVE_TEST_HOST, default: '${nowhere}'}\n\
             url: '${host}:${port}'",
        )
        .unwrap();
        assert_eq!(resolved.get("url"), Some(&Value::from("db.internal:5432")));
        assert_eq!(resolved.get("port"), Some(&Value::Int(5432)));

        let err = resolve("x: !env CONFGRAPH_RESOLVE_TEST_UNSET").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at x (!env): environment variable `CONFGRAPH_RESOLVE_TEST_UNSET` is not set and no default was given");

        let policy = SecurityPolicy::restrictive().allow_env("CONFGRAPH_RESOLVE_TEST_*");
        let registry = CapabilityRegistry::new();
        assert!(resolve_with("x: !env CONFGRAPH_RESOLVE_TEST_HOST", &policy, &registry).is_ok());
        let err = resolve_with("x: !env HOME", &policy, &registry).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Permission {
                denial: PolicyDenial::Env(ref var),
                ..
            } if var == "HOME"
        ));
    }

    #[test]
    fn test_import_yields_symbol() {
        let resolved = resolve("f: !import len\nn: !$@f [[1, 2, 3]]").unwrap();
        assert!(matches!(resolved.get("f"), Some(Value::Symbol(s)) if s.name() == "len"));
        assert_eq!(resolved.get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_max_depth() {
        let root = tree("a: {b: {c: 1}}");
        let policy = SecurityPolicy::permissive();
        let registry = CapabilityRegistry::new();
        let err = Resolver::new(&root, &policy, &registry).with_max_depth(3).resolve().unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"resolution error at a.b.c (reference): nesting deeper than 3 levels");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let text = "a: {b: 5}\nc: '${a.b}-${d}'\nd: ${a.b + 1}\nm: !@dict {x: '${d}'}";
        let first = resolve(text).unwrap();
        let second = resolve(text).unwrap();
        assert_eq!(first.config, second.config);
    }

    #[test]
    fn test_aliases() {
        let mut registry = CapabilityRegistry::new();
        registry.register("pkg.make", |args: Arguments| -> std::result::Result<Value, InvocationError> {
            Ok(Value::Map(args.keyword))
        });
        let policy = SecurityPolicy::permissive();

        let resolved = resolve_with(
            "uses: ${shared.size}\n\
             holder: {inner: !@pkg.make {id: shared, size: 3}}",
            &policy,
            &registry,
        )
        .unwrap();
        assert_eq!(resolved.get("uses"), Some(&Value::Int(3)));
        assert_eq!(json(resolved.instance("shared").unwrap()), r#"{"size":3}"#);

        let resolved = resolve_with(
            "a: !@pkg.make {id: dup, v: 1}\nb: !@pkg.make {id: dup, v: 2}\nseen: ${dup.v}",
            &policy,
            &registry,
        )
        .unwrap();
        assert_eq!(resolved.get("seen"), Some(&Value::Int(2)));

        let resolved = resolve_with(
            "net: plain\nm: !@pkg.make {id: net, v: 1}\nseen: ${net}",
            &policy,
            &registry,
        )
        .unwrap();
        assert_eq!(resolved.get("seen"), Some(&Value::from("plain")));
    }
}
