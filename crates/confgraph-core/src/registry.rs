//! Named capabilities that construction directives can call.
//!
//! `!@pkg.Name` looks `pkg.Name` up in a [`CapabilityRegistry`]. Hosts
//! register their own constructors and functions next to the builtins:
//!
//! ```rust
//! use confgraph_core::{Arguments, CapabilityRegistry, InvocationError, Value};
//!
//! let mut registry = CapabilityRegistry::with_builtins();
//! registry.register("math.double", |args: Arguments| -> Result<Value, InvocationError> {
//!     let n = args.positional.first().and_then(Value::as_i64).unwrap_or(0);
//!     Ok(Value::Int(n * 2))
//! });
//! assert!(registry.contains("math.double"));
//! ```

use crate::value::{Number, Value, compare};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Module that undotted names belong to.
pub const BUILTIN_MODULE: &str = "builtins";

/// Arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub keyword: IndexMap<String, Value>,
}

impl Arguments {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: IndexMap::new(),
        }
    }

    pub fn keyword(values: IndexMap<String, Value>) -> Self {
        Self {
            positional: Vec::new(),
            keyword: values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Reject keyword arguments for functions that take none.
    pub fn no_keywords(&self, function: &str) -> Result<(), InvocationError> {
        match self.keyword.keys().next() {
            Some(keyword) => Err(InvocationError::UnexpectedKeyword {
                function: function.to_string(),
                keyword: keyword.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("{function}() takes {expected} positional argument(s) but {given} were given")]
    Arity {
        function: String,
        expected: String,
        given: usize,
    },

    #[error("{function}() got an unexpected keyword argument `{keyword}`")]
    UnexpectedKeyword { function: String, keyword: String },

    #[error("{0}")]
    Type(String),

    #[error("{0}")]
    Value(String),

    #[error("{type_name} has no member `{member}`")]
    UnknownMember { type_name: String, member: String },

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("{0}")]
    Failed(String),
}

/// Something that can be called with [`Arguments`].
///
/// Implemented for every `Fn(Arguments) -> Result<Value, InvocationError>`.
pub trait Capability: Send + Sync {
    fn call(&self, args: Arguments) -> Result<Value, InvocationError>;
}

impl<F> Capability for F
where
    F: Fn(Arguments) -> Result<Value, InvocationError> + Send + Sync,
{
    fn call(&self, args: Arguments) -> Result<Value, InvocationError> {
        self(args)
    }
}

/// A capability bound to its dotted name. This is what `!import` yields.
#[derive(Clone)]
pub struct Symbol {
    name: String,
    capability: Arc<dyn Capability>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        Self {
            name: name.into(),
            capability,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: Arguments) -> Result<Value, InvocationError> {
        self.capability.call(args)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Symbol").field(&self.name).finish()
    }
}

/// Why a dotted name did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    UnknownModule { module: String },
    MissingMember { module: String, member: String },
}

/// Dotted name → capability table.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: IndexMap<String, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `dict`, `list`, `str`, `int`, `float`, `bool`, `len`,
    /// `min`, `max`, `sum` and `range`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("dict", builtin_dict)
            .register("list", builtin_list)
            .register("str", builtin_str)
            .register("int", builtin_int)
            .register("float", builtin_float)
            .register("bool", builtin_bool)
            .register("len", builtin_len)
            .register("min", |args: Arguments| builtin_extreme("min", Ordering::Less, args))
            .register("max", |args: Arguments| builtin_extreme("max", Ordering::Greater, args))
            .register("sum", builtin_sum)
            .register("range", builtin_range);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, capability: impl Capability + 'static) -> &mut Self {
        self.entries.insert(name.into(), Arc::new(capability));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(canonical_name(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Resolve a dotted name to a symbol.
    ///
    /// A miss reports whether the module prefix is known at all.
    pub fn lookup(&self, name: &str) -> Result<Symbol, LookupError> {
        let key = canonical_name(name);
        if let Some(capability) = self.entries.get(key) {
            return Ok(Symbol::new(name, Arc::clone(capability)));
        }

        let (module, member) = match key.rsplit_once('.') {
            Some((module, member)) => (module, member),
            None => (BUILTIN_MODULE, key),
        };
        let known = module == BUILTIN_MODULE
            || self
                .entries
                .keys()
                .any(|k| k.strip_prefix(module).is_some_and(|rest| rest.starts_with('.')));
        if known {
            Err(LookupError::MissingMember {
                module: module.to_string(),
                member: member.to_string(),
            })
        } else {
            Err(LookupError::UnknownModule {
                module: module.to_string(),
            })
        }
    }
}

fn canonical_name(name: &str) -> &str {
    name.strip_prefix(BUILTIN_MODULE)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name)
}

fn arity(function: &str, expected: &str, given: usize) -> InvocationError {
    InvocationError::Arity {
        function: function.to_string(),
        expected: expected.to_string(),
        given,
    }
}

fn builtin_dict(args: Arguments) -> Result<Value, InvocationError> {
    let mut out = IndexMap::new();
    match args.positional.as_slice() {
        [] => {}
        [Value::Map(map)] => out.extend(map.clone()),
        [Value::List(pairs)] => {
            for pair in pairs {
                match pair.as_list() {
                    Some([Value::String(key), value]) => {
                        out.insert(key.clone(), value.clone());
                    }
                    _ => {
                        return Err(InvocationError::Type(
                            "dict() sequence elements must be [str, value] pairs".into(),
                        ));
                    }
                }
            }
        }
        [other] => {
            return Err(InvocationError::Type(format!(
                "dict() cannot convert {}",
                other.type_name()
            )));
        }
        more => return Err(arity("dict", "at most 1", more.len())),
    }
    out.extend(args.keyword);
    Ok(Value::Map(out))
}

fn builtin_list(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("list")?;
    match args.positional.as_slice() {
        [] => Ok(Value::List(Vec::new())),
        [Value::List(items)] => Ok(Value::List(items.clone())),
        [Value::String(text)] => Ok(Value::List(
            text.chars().map(|c| Value::String(c.to_string())).collect(),
        )),
        [Value::Map(map)] => Ok(Value::List(map.keys().map(|k| Value::from(k.as_str())).collect())),
        [other] => Err(InvocationError::Type(format!(
            "{} is not iterable",
            other.type_name()
        ))),
        more => Err(arity("list", "at most 1", more.len())),
    }
}

fn builtin_str(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("str")?;
    match args.positional.as_slice() {
        [] => Ok(Value::String(String::new())),
        [value] => Ok(Value::String(value.to_text())),
        more => Err(arity("str", "at most 1", more.len())),
    }
}

fn builtin_int(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("int")?;
    match args.positional.as_slice() {
        [] => Ok(Value::Int(0)),
        [Value::Int(i)] => Ok(Value::Int(*i)),
        [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
        [Value::Float(f)] => {
            let truncated = f.trunc();
            if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Ok(Value::Int(truncated as i64))
            } else {
                Err(InvocationError::Value(format!(
                    "cannot convert float {f} to int"
                )))
            }
        }
        [Value::String(text)] => text.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            InvocationError::Value(format!("invalid literal for int(): '{text}'"))
        }),
        [other] => Err(InvocationError::Type(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
        more => Err(arity("int", "at most 1", more.len())),
    }
}

fn builtin_float(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("float")?;
    match args.positional.as_slice() {
        [] => Ok(Value::Float(0.0)),
        [Value::Float(f)] => Ok(Value::Float(*f)),
        [Value::Int(i)] => Ok(Value::Float(*i as f64)),
        [Value::Bool(b)] => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        [Value::String(text)] => text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            InvocationError::Value(format!("could not convert string to float: '{text}'"))
        }),
        [other] => Err(InvocationError::Type(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
        more => Err(arity("float", "at most 1", more.len())),
    }
}

fn builtin_bool(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("bool")?;
    match args.positional.as_slice() {
        [] => Ok(Value::Bool(false)),
        [value] => Ok(Value::Bool(value.truthy())),
        more => Err(arity("bool", "at most 1", more.len())),
    }
}

fn builtin_len(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("len")?;
    let len = match args.positional.as_slice() {
        [Value::List(items)] => items.len(),
        [Value::Map(map)] => map.len(),
        [Value::String(text)] => text.chars().count(),
        [other] => {
            return Err(InvocationError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
        more => return Err(arity("len", "exactly 1", more.len())),
    };
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| InvocationError::Value("length does not fit in an int".into()))
}

fn builtin_extreme(function: &str, wanted: Ordering, args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords(function)?;
    let items: &[Value] = match args.positional.as_slice() {
        [Value::List(items)] => items.as_slice(),
        [] => return Err(arity(function, "at least 1", 0)),
        [other] => {
            return Err(InvocationError::Type(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
        items => items,
    };
    let mut best: Option<&Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => match compare(item, current) {
                Some(ordering) if ordering == wanted => Some(item),
                Some(_) => Some(current),
                None => {
                    return Err(InvocationError::Type(format!(
                        "'{function}' not supported between '{}' and '{}'",
                        item.type_name(),
                        current.type_name()
                    )));
                }
            },
        };
    }
    best.cloned()
        .ok_or_else(|| InvocationError::Value(format!("{function}() arg is an empty sequence")))
}

fn builtin_sum(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("sum")?;
    let (items, start) = match args.positional.as_slice() {
        [Value::List(items)] => (items, Value::Int(0)),
        [Value::List(items), start] => (items, start.clone()),
        [other, ..] if !matches!(other, Value::List(_)) => {
            return Err(InvocationError::Type(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
        more => return Err(arity("sum", "1 or 2", more.len())),
    };
    items.iter().try_fold(start, |total, item| {
        match (Number::of(&total), Number::of(item)) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| InvocationError::Value("integer overflow in sum()".into())),
            (Some(a), Some(b)) => Ok(Value::Float(a.as_f64() + b.as_f64())),
            _ => Err(InvocationError::Type(format!(
                "unsupported operand type(s) for +: '{}' and '{}'",
                total.type_name(),
                item.type_name()
            ))),
        }
    })
}

fn builtin_range(args: Arguments) -> Result<Value, InvocationError> {
    args.no_keywords("range")?;
    let ints = args
        .positional
        .iter()
        .map(|v| match v {
            Value::Int(i) => Ok(*i),
            other => Err(InvocationError::Type(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        other => return Err(arity("range", "1 to 3", other.len())),
    };
    if step == 0 {
        return Err(InvocationError::Value("range() arg 3 must not be zero".into()));
    }
    let mut out = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        out.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::List(out))
}
