//! Construction and invocation directives.
//!
//! The callee is settled first (static name, interpolated name, or a member
//! of a resolved instance), then every argument is resolved, then the call
//! happens once. The result is recorded as the instance at the directive's
//! path.

use super::{Resolver, permission};
use crate::error::{ConfigError, ConstructionFailure, Result};
use crate::expr::attribute_value;
use crate::path::Path;
use crate::registry::{Arguments, InvocationError, LookupError, Symbol};
use crate::types::{CallArgs, CallSpec, CallTarget, DirectiveKind, NamePart, NameTemplate};
use crate::value::{Object, Value};
use std::sync::Arc;
use tracing::debug;

/// What a construction directive ends up calling.
enum Callee {
    Symbol(Symbol),
    Object { name: String, object: Arc<dyn Object> },
    Member { name: String, object: Arc<dyn Object>, member: String },
}

impl Callee {
    fn name(&self) -> &str {
        match self {
            Callee::Symbol(symbol) => symbol.name(),
            Callee::Object { name, .. } | Callee::Member { name, .. } => name,
        }
    }

    fn call(&self, args: Arguments) -> std::result::Result<Value, InvocationError> {
        match self {
            Callee::Symbol(symbol) => symbol.call(args),
            Callee::Object { object, .. } => object.call(args),
            Callee::Member { object, member, .. } => object.invoke(member, args),
        }
    }
}

impl<'a> Resolver<'a> {
    pub(super) fn construct(&mut self, call: &'a CallSpec, at: &Path) -> Result<Value> {
        let kind = match call.target {
            CallTarget::Static(_) => DirectiveKind::Construct,
            CallTarget::Dynamic(_) => DirectiveKind::DynamicConstruct,
        };
        let callee = self.callee(&call.target, at, kind)?;
        let args = self.arguments(&call.args, at)?;

        debug!(path = %at, target = callee.name(), "constructing");
        let value = callee.call(args).map_err(|source| ConfigError::Construction {
            path: at.clone(),
            directive: kind,
            reason: ConstructionFailure::Invocation {
                target: callee.name().to_string(),
                source,
            },
        })?;

        self.instances.insert(at.clone(), value.clone());
        if let Some(id) = &call.id {
            debug!(path = %at, id = %id, "registered instance alias");
        }
        Ok(value)
    }

    /// Look a dotted name up, after the import gate.
    pub(super) fn symbol(&self, name: &str, at: &Path, kind: DirectiveKind) -> Result<Symbol> {
        self.policy
            .check_import(name)
            .map_err(|denial| permission(at, kind, denial))?;
        self.registry.lookup(name).map_err(|err| {
            let reason = match err {
                LookupError::UnknownModule { module } => ConstructionFailure::UnknownModule {
                    name: name.to_string(),
                    module,
                },
                LookupError::MissingMember { module, member } => ConstructionFailure::MissingMember {
                    name: name.to_string(),
                    module,
                    member,
                },
            };
            ConfigError::Construction {
                path: at.clone(),
                directive: kind,
                reason,
            }
        })
    }

    fn callee(&mut self, target: &CallTarget, at: &Path, kind: DirectiveKind) -> Result<Callee> {
        match target {
            CallTarget::Static(name) => self.symbol(name, at, kind).map(Callee::Symbol),
            CallTarget::Dynamic(NameTemplate::Parts(parts)) => {
                let mut name = String::new();
                for part in parts {
                    match part {
                        NamePart::Text(text) => name.push_str(text),
                        NamePart::Reference(reference) => {
                            let value = self.value_at(&Path::from_keys([reference.as_str()]))?;
                            name.push_str(&value.to_text());
                        }
                    }
                }
                self.symbol(&name, at, kind).map(Callee::Symbol)
            }
            CallTarget::Dynamic(NameTemplate::Reference(segments)) => {
                let written = segments.join(".");
                if let Some((member, owner)) = segments.split_last().filter(|(_, owner)| !owner.is_empty()) {
                    let owner_value = self.value_at(&Path::from_keys(owner.iter().cloned()))?;
                    if let Value::Object(object) = owner_value {
                        return Ok(Callee::Member {
                            name: written,
                            object,
                            member: member.clone(),
                        });
                    }
                    let value = attribute_value(&owner_value, member, &written)
                        .map_err(|reason| ConfigError::resolution(at, kind, reason))?;
                    return self.callee_from_value(value, written, at, kind);
                }
                let value = self.value_at(&Path::from_keys(segments.iter().cloned()))?;
                self.callee_from_value(value, written, at, kind)
            }
        }
    }

    /// `!$@ref`: a string names a capability, a symbol or object is called.
    fn callee_from_value(&self, value: Value, written: String, at: &Path, kind: DirectiveKind) -> Result<Callee> {
        match value {
            Value::String(name) => self.symbol(&name, at, kind).map(Callee::Symbol),
            Value::Symbol(symbol) => Ok(Callee::Symbol(symbol)),
            Value::Object(object) => Ok(Callee::Object { name: written, object }),
            other => Err(ConfigError::Construction {
                path: at.clone(),
                directive: kind,
                reason: ConstructionFailure::NotCallable {
                    target: written,
                    type_name: other.type_name().to_string(),
                },
            }),
        }
    }

    fn arguments(&mut self, args: &'a CallArgs, at: &Path) -> Result<Arguments> {
        Ok(match args {
            CallArgs::None => Arguments::default(),
            CallArgs::Positional(items) => Arguments::positional(self.resolve_items(items, at)?),
            CallArgs::Keyword(map) => Arguments::keyword(self.resolve_map(map, at)?),
            CallArgs::Single(arg) => Arguments::positional(vec![self.resolve_node(arg, at)?]),
        })
    }
}
