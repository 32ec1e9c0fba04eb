//! Conversion from parsed YAML to the unresolved [`Node`] tree.
//!
//! This is where tags become [`Directive`]s. Every payload shape is checked
//! here, so later stages can rely on a directive being well-formed.

use crate::error::{ConfigError, Result};
use crate::path::Path;
use crate::types::{
    CallArgs, CallSpec, CallTarget, Directive, ID_KEY, IncludeMode, IncludeSpec, NamePart, NameTemplate, Node,
    NodeKind, Scalar,
};
use confgraph_yaml::{TaggedValue, TaggedYaml, Yaml};
use indexmap::IndexMap;

/// Convert a parsed document. `name` identifies the document in errors.
pub fn node_from_yaml(yaml: &TaggedYaml, name: &str) -> Result<Node> {
    Converter { name }.convert(yaml, &Path::root())
}

struct Converter<'a> {
    name: &'a str,
}

impl Converter<'_> {
    fn convert(&self, yaml: &TaggedYaml, path: &Path) -> Result<Node> {
        if let Some(tag) = yaml.tag_name() {
            let directive = self.directive(tag, yaml, path)?;
            return Ok(Node::directive(directive, yaml.source_info.clone()));
        }
        self.convert_untagged(yaml, path)
    }

    fn convert_untagged(&self, yaml: &TaggedYaml, path: &Path) -> Result<Node> {
        let kind = match &yaml.value {
            TaggedValue::Scalar { value, text, .. } => NodeKind::Scalar(scalar_from_yaml(value, text)),
            TaggedValue::Sequence(items) => NodeKind::Sequence(self.convert_items(items, path)?),
            TaggedValue::Mapping(_) => NodeKind::Mapping(self.convert_entries(yaml, path)?),
        };
        Ok(Node::new(kind, yaml.source_info.clone()))
    }

    fn convert_items(&self, items: &[TaggedYaml], path: &Path) -> Result<Vec<Node>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.convert(item, &path.index(i)))
            .collect()
    }

    fn convert_entries(&self, yaml: &TaggedYaml, path: &Path) -> Result<IndexMap<String, Node>> {
        let mut map = IndexMap::new();
        for entry in yaml.as_mapping().unwrap_or_default() {
            let Some(key) = key_text(&entry.key) else {
                return Err(ConfigError::Parse {
                    name: self.name.to_string(),
                    source: confgraph_yaml::Error::InvalidStructure {
                        message: format!("mapping keys must be scalars (under {path})"),
                        location: Some(entry.key.source_info.clone()),
                    },
                });
            };
            let value = self.convert(&entry.value, &path.key(key.as_str()))?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn directive(&self, tag: &str, yaml: &TaggedYaml, path: &Path) -> Result<Directive> {
        let bad = |message: &str| ConfigError::tag(path, format!("!{tag}"), message, &yaml.source_info);

        match tag {
            "env" => self.env(yaml, path)?.ok_or_else(|| {
                bad("expected a variable name or a mapping with `var` and an optional `default`")
            }),
            "extend" => match yaml.as_sequence() {
                Some(items) => Ok(Directive::Extend(self.convert_items(items, path)?)),
                None => Err(bad("expected a sequence")),
            },
            "patch" => {
                if yaml.is_mapping() {
                    Ok(Directive::Patch(self.convert_entries(yaml, path)?))
                } else {
                    Err(bad("expected a mapping"))
                }
            }
            "include" | "include_at" | "include_from" => {
                let mode = match tag {
                    "include" => IncludeMode::Nested,
                    "include_at" => IncludeMode::At,
                    _ => IncludeMode::From,
                };
                let file = non_empty_text(yaml).ok_or_else(|| bad("expected a file path"))?;
                Ok(Directive::Include(IncludeSpec {
                    mode,
                    path: file.to_string(),
                }))
            }
            "import" => {
                let name = non_empty_text(yaml).ok_or_else(|| bad("expected a dotted name"))?;
                Ok(Directive::Import(name.to_string()))
            }
            _ => {
                if let Some(name) = tag.strip_prefix('@') {
                    if !is_dotted_name(name) {
                        return Err(bad("expected a dotted name after `@`"));
                    }
                    self.call(CallTarget::Static(name.to_string()), yaml, path, &bad)
                } else if let Some(template) = tag.strip_prefix('$') {
                    let template = parse_name_template(template)
                        .ok_or_else(|| bad("expected a name template such as `pkg.@ref.Name` or `@ref.member`"))?;
                    self.call(CallTarget::Dynamic(template), yaml, path, &bad)
                } else {
                    Err(bad("unknown tag"))
                }
            }
        }
    }

    fn env(&self, yaml: &TaggedYaml, path: &Path) -> Result<Option<Directive>> {
        if let Some(var) = non_empty_text(yaml) {
            return Ok(Some(Directive::Env {
                var: var.to_string(),
                default: None,
            }));
        }
        let var = yaml.get("var").or_else(|| yaml.get("name")).and_then(non_empty_text);
        let Some(var) = var else {
            return Ok(None);
        };
        let default = match yaml.get("default") {
            Some(node) => Some(Box::new(self.convert(node, &path.key("default"))?)),
            None => None,
        };
        Ok(Some(Directive::Env {
            var: var.to_string(),
            default,
        }))
    }

    fn call(
        &self,
        target: CallTarget,
        yaml: &TaggedYaml,
        path: &Path,
        bad: &dyn Fn(&str) -> ConfigError,
    ) -> Result<Directive> {
        let mut id = None;
        let args = match &yaml.value {
            TaggedValue::Sequence(items) => CallArgs::Positional(self.convert_items(items, path)?),
            TaggedValue::Mapping(_) => {
                let mut kwargs = self.convert_entries(yaml, path)?;
                if let Some(node) = kwargs.shift_remove(ID_KEY) {
                    match node.kind {
                        NodeKind::Scalar(Scalar::String(name)) if !name.is_empty() => id = Some(name),
                        _ => return Err(bad("`id` must be a non-empty string")),
                    }
                }
                CallArgs::Keyword(kwargs)
            }
            TaggedValue::Scalar { value, text, .. } => {
                if matches!(value, Yaml::Null) || text.is_empty() {
                    CallArgs::None
                } else {
                    CallArgs::Single(Box::new(self.convert_untagged(yaml, path)?))
                }
            }
        };
        Ok(Directive::Construct(CallSpec { target, args, id }))
    }
}

fn scalar_from_yaml(value: &Yaml, text: &str) -> Scalar {
    match value {
        Yaml::Null => Scalar::Null,
        Yaml::Boolean(b) => Scalar::Bool(*b),
        Yaml::Integer(i) => Scalar::Int(*i),
        Yaml::Real(_) => value.as_f64().map_or_else(|| Scalar::String(text.to_string()), Scalar::Float),
        Yaml::String(s) => Scalar::String(s.clone()),
        _ => Scalar::String(text.to_string()),
    }
}

/// Text of a scalar key. Null keys (`~: x`) keep their written form.
fn key_text(key: &TaggedYaml) -> Option<String> {
    match &key.value {
        TaggedValue::Scalar {
            value: Yaml::String(s),
            ..
        } => Some(s.clone()),
        TaggedValue::Scalar { text, .. } => Some(text.clone()),
        _ => None,
    }
}

fn non_empty_text(yaml: &TaggedYaml) -> Option<&str> {
    yaml.text().map(str::trim).filter(|text| !text.is_empty())
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty() && text.split('.').all(is_identifier)
}

/// Parse the part of a `!$...` tag after the `$`.
///
/// `@ref.member` (leading reference) addresses a config value; anything
/// else is a dotted name whose `@ident` parts are substituted.
pub(crate) fn parse_name_template(template: &str) -> Option<NameTemplate> {
    if let Some(rest) = template.strip_prefix('@') {
        if !is_dotted_name(rest) {
            return None;
        }
        return Some(NameTemplate::Reference(rest.split('.').map(str::to_string).collect()));
    }

    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '@' {
            text.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            let valid = if j == start {
                next.is_alphabetic() || next == '_'
            } else {
                next.is_alphanumeric() || next == '_'
            };
            if !valid {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        if end == start {
            return None;
        }
        if !text.is_empty() {
            parts.push(NamePart::Text(std::mem::take(&mut text)));
        }
        parts.push(NamePart::Reference(template[start..end].to_string()));
    }
    if !text.is_empty() {
        parts.push(NamePart::Text(text));
    }
    if parts.is_empty() {
        None
    } else {
        Some(NameTemplate::Parts(parts))
    }
}
