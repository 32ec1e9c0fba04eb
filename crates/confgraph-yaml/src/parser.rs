//! YAML parser that builds TaggedYaml trees.

use crate::{Error, Result, ScalarStyle, SourceInfo, Tag, TaggedEntry, TaggedValue, TaggedYaml};
use std::collections::HashMap;
use yaml_rust2::Yaml;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

const CORE_TAG_PREFIX: &str = "tag:yaml.org,2002:";

/// Parse YAML from a string, producing a TaggedYaml tree.
///
/// Only the first document of a multi-document stream is read. An empty
/// document parses to a null scalar.
///
/// # Example
///
/// ```rust
/// use confgraph_yaml::parse;
///
/// let yaml = parse("model: !@pkg.Model {depth: 3}").unwrap();
/// let model = yaml.get("model").unwrap();
/// assert_eq!(model.tag_name(), Some("@pkg.Model"));
/// assert!(model.is_mapping());
/// ```
///
/// # Errors
///
/// Returns an error if the YAML is invalid.
pub fn parse(content: &str) -> Result<TaggedYaml> {
    parse_impl(content, None)
}

/// Parse YAML from a string with an associated filename.
///
/// The filename is recorded in the source location of every node and in
/// the location of any error.
pub fn parse_file(content: &str, filename: &str) -> Result<TaggedYaml> {
    parse_impl(content, Some(filename)).map_err(|e| e.with_file(filename))
}

fn parse_impl(content: &str, filename: Option<&str>) -> Result<TaggedYaml> {
    let mut parser = Parser::new_from_str(content);
    let mut builder = TaggedBuilder::new(filename);

    parser
        .load(&mut builder, false) // single document only
        .map_err(|e| {
            let marker = *e.marker();
            Error::Syntax {
                message: e.info().to_string(),
                location: Some(SourceInfo::from_marker(&marker, 0)),
            }
        })?;

    builder.result()
}

/// Receives marked events and assembles the tree bottom-up.
struct TaggedBuilder {
    filename: Option<String>,
    stack: Vec<BuildNode>,
    root: Option<TaggedYaml>,
    anchors: HashMap<usize, TaggedYaml>,
    /// First structural problem seen; events cannot return errors directly.
    error: Option<Error>,
}

enum BuildNode {
    Sequence {
        start_marker: Marker,
        anchor: usize,
        tag: Option<Tag>,
        items: Vec<TaggedYaml>,
    },
    Mapping {
        start_marker: Marker,
        anchor: usize,
        tag: Option<Tag>,
        entries: Vec<TaggedEntry>,
        pending_key: Option<TaggedYaml>,
    },
}

impl TaggedBuilder {
    fn new(filename: Option<&str>) -> Self {
        Self {
            filename: filename.map(str::to_string),
            stack: Vec::new(),
            root: None,
            anchors: HashMap::new(),
            error: None,
        }
    }

    fn result(self) -> Result<TaggedYaml> {
        let start = self.make_source_info_at_start();
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.stack.is_empty() {
            return Err(Error::InvalidStructure {
                message: "unterminated collection".into(),
                location: None,
            });
        }
        Ok(self.root.unwrap_or_else(|| TaggedYaml::null(start)))
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn make_source_info(&self, marker: &Marker, len: usize) -> SourceInfo {
        let info = SourceInfo::from_marker(marker, len);
        match &self.filename {
            Some(filename) => info.with_file(filename.clone()),
            None => info,
        }
    }

    fn make_source_info_at_start(&self) -> SourceInfo {
        let info = SourceInfo::default();
        match &self.filename {
            Some(filename) => info.with_file(filename.clone()),
            None => info,
        }
    }

    fn make_tag(&self, tag: Option<yaml_rust2::parser::Tag>, marker: &Marker) -> Option<Tag> {
        let tag = tag?;
        let name = tag_name(&tag.handle, &tag.suffix);
        Some(Tag {
            source_info: self.make_source_info(marker, name.len() + 1),
            name,
        })
    }

    fn remember(&mut self, anchor: usize, node: &TaggedYaml) {
        if anchor > 0 {
            self.anchors.insert(anchor, node.clone());
        }
    }

    fn push_complete(&mut self, node: TaggedYaml) {
        match self.stack.last_mut() {
            None => {
                if self.root.is_none() {
                    self.root = Some(node);
                }
            }
            Some(BuildNode::Sequence { items, .. }) => items.push(node),
            Some(BuildNode::Mapping {
                entries,
                pending_key,
                ..
            }) => match pending_key.take() {
                Some(key) => entries.push(TaggedEntry { key, value: node }),
                None => *pending_key = Some(node),
            },
        }
    }
}

impl MarkedEventReceiver for TaggedBuilder {
    fn on_event(&mut self, ev: Event, marker: Marker) {
        if self.error.is_some() {
            return;
        }

        match ev {
            Event::Nothing
            | Event::StreamStart
            | Event::StreamEnd
            | Event::DocumentStart
            | Event::DocumentEnd => {}

            Event::Scalar(value, style, anchor, tag) => {
                let text = value.to_string();
                let tag = self.make_tag(tag, &marker);
                let style = if style == TScalarStyle::Plain {
                    ScalarStyle::Plain
                } else {
                    ScalarStyle::Quoted
                };
                let forced_string = tag.as_ref().is_some_and(|t| !t.is_local());
                let yaml = match style {
                    ScalarStyle::Plain if !forced_string => parse_scalar_value(&text),
                    _ => Yaml::String(text.clone()),
                };
                let node = TaggedYaml {
                    source_info: self.make_source_info(&marker, text.len()),
                    value: TaggedValue::Scalar {
                        value: yaml,
                        text,
                        style,
                    },
                    tag,
                };
                self.remember(anchor, &node);
                self.push_complete(node);
            }

            Event::SequenceStart(anchor, tag) => {
                let tag = self.make_tag(tag, &marker);
                self.stack.push(BuildNode::Sequence {
                    start_marker: marker,
                    anchor,
                    tag,
                    items: Vec::new(),
                });
            }

            Event::SequenceEnd => match self.stack.pop() {
                Some(BuildNode::Sequence {
                    start_marker,
                    anchor,
                    tag,
                    items,
                }) => {
                    let len = marker.index().saturating_sub(start_marker.index());
                    let node = TaggedYaml {
                        value: TaggedValue::Sequence(items),
                        tag,
                        source_info: self.make_source_info(&start_marker, len),
                    };
                    self.remember(anchor, &node);
                    self.push_complete(node);
                }
                _ => self.fail(Error::InvalidStructure {
                    message: "sequence end without matching start".into(),
                    location: Some(self.make_source_info(&marker, 0)),
                }),
            },

            Event::MappingStart(anchor, tag) => {
                let tag = self.make_tag(tag, &marker);
                self.stack.push(BuildNode::Mapping {
                    start_marker: marker,
                    anchor,
                    tag,
                    entries: Vec::new(),
                    pending_key: None,
                });
            }

            Event::MappingEnd => match self.stack.pop() {
                Some(BuildNode::Mapping {
                    start_marker,
                    anchor,
                    tag,
                    entries,
                    pending_key: None,
                }) => {
                    let len = marker.index().saturating_sub(start_marker.index());
                    let node = TaggedYaml {
                        value: TaggedValue::Mapping(entries),
                        tag,
                        source_info: self.make_source_info(&start_marker, len),
                    };
                    self.remember(anchor, &node);
                    self.push_complete(node);
                }
                _ => self.fail(Error::InvalidStructure {
                    message: "mapping end without matching start or with a dangling key".into(),
                    location: Some(self.make_source_info(&marker, 0)),
                }),
            },

            Event::Alias(anchor) => match self.anchors.get(&anchor).cloned() {
                Some(node) => self.push_complete(node),
                None => {
                    let location = self.make_source_info(&marker, 0);
                    self.fail(Error::UnknownAnchor { anchor, location });
                }
            },
        }
    }
}

/// Combine a tag handle and suffix into the name stored on [`Tag`].
fn tag_name(handle: &str, suffix: &str) -> String {
    if handle == "!!" || handle.starts_with(CORE_TAG_PREFIX) {
        return format!("{CORE_TAG_PREFIX}{suffix}");
    }
    let full = format!("{handle}{suffix}");
    match full.strip_prefix('!') {
        Some(local) => local.to_string(),
        None => full,
    }
}

/// Infer the type of a plain scalar.
///
/// Handles integers, floats (including `.inf` and `.nan`), booleans and
/// null. Anything else stays a string.
fn parse_scalar_value(value: &str) -> Yaml {
    if let Ok(i) = value.parse::<i64>() {
        return Yaml::Integer(i);
    }

    match value {
        ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" | "-.inf" | "-.Inf" | "-.INF"
        | ".nan" | ".NaN" | ".NAN" => {
            return Yaml::Real(value.to_string());
        }
        _ => {}
    }

    // Rust accepts "inf" and "nan" as floats; YAML does not.
    if value.chars().any(|c| c.is_ascii_digit()) && value.parse::<f64>().is_ok() {
        return Yaml::Real(value.to_string());
    }

    match value {
        "true" | "True" | "TRUE" | "yes" | "Yes" | "YES" | "on" | "On" | "ON" => {
            Yaml::Boolean(true)
        }
        "false" | "False" | "FALSE" | "no" | "No" | "NO" | "off" | "Off" | "OFF" => {
            Yaml::Boolean(false)
        }
        "null" | "Null" | "NULL" | "~" | "" => Yaml::Null,
        _ => Yaml::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_scalars() {
        let yaml = parse("a: 42\nb: 1.5\nc: yes\nd: ~\ne: hello\nf: inf").unwrap();
        assert_eq!(yaml.get("a").unwrap().as_yaml(), Some(&Yaml::Integer(42)));
        assert_eq!(
            yaml.get("b").unwrap().as_yaml(),
            Some(&Yaml::Real("1.5".into()))
        );
        assert_eq!(yaml.get("c").unwrap().as_yaml(), Some(&Yaml::Boolean(true)));
        assert_eq!(yaml.get("d").unwrap().as_yaml(), Some(&Yaml::Null));
        assert_eq!(
            yaml.get("e").unwrap().as_yaml(),
            Some(&Yaml::String("hello".into()))
        );
        assert_eq!(
            yaml.get("f").unwrap().as_yaml(),
            Some(&Yaml::String("inf".into()))
        );
    }

    #[test]
    fn test_quoted_scalars_stay_strings() {
        let yaml = parse("a: '42'\nb: \"true\"").unwrap();
        let a = yaml.get("a").unwrap();
        assert_eq!(a.as_yaml(), Some(&Yaml::String("42".into())));
        assert!(matches!(
            a.value,
            TaggedValue::Scalar {
                style: ScalarStyle::Quoted,
                ..
            }
        ));
        assert_eq!(
            yaml.get("b").unwrap().as_yaml(),
            Some(&Yaml::String("true".into()))
        );
    }

    #[test]
    fn test_core_str_tag_forces_string() {
        let yaml = parse("a: !!str 42").unwrap();
        let a = yaml.get("a").unwrap();
        assert_eq!(a.as_yaml(), Some(&Yaml::String("42".into())));
        assert_eq!(a.tag_name(), None);
    }

    #[test]
    fn test_local_tags() {
        let yaml = parse(
            "a: !env HOME\nb: !@pkg.mod.Class {x: 1}\nc: !$@ref.method\nd: !include_from [x.yml]",
        )
        .unwrap();
        assert_eq!(yaml.get("a").unwrap().tag_name(), Some("env"));
        assert_eq!(yaml.get("b").unwrap().tag_name(), Some("@pkg.mod.Class"));
        assert!(yaml.get("b").unwrap().is_mapping());
        assert_eq!(yaml.get("c").unwrap().tag_name(), Some("$@ref.method"));
        assert_eq!(yaml.get("d").unwrap().tag_name(), Some("include_from"));
        assert!(yaml.get("d").unwrap().is_sequence());
    }

    #[test]
    fn test_tagged_scalar_keeps_text_and_value() {
        let yaml = parse("a: !@int 5").unwrap();
        let a = yaml.get("a").unwrap();
        assert_eq!(a.text(), Some("5"));
        assert_eq!(a.as_yaml(), Some(&Yaml::Integer(5)));
    }

    #[test]
    fn test_mapping_preserves_order_and_duplicates() {
        let yaml = parse("z: 1\na: 2\nz: 3").unwrap();
        let keys: Vec<_> = yaml
            .as_mapping()
            .unwrap()
            .iter()
            .map(|e| e.key.text().unwrap())
            .collect();
        assert_eq!(keys, vec!["z", "a", "z"]);
        assert_eq!(yaml.get("z").unwrap().as_yaml(), Some(&Yaml::Integer(3)));
    }

    #[test]
    fn test_anchors_and_aliases() {
        let yaml = parse("base: &b {x: 1}\ncopy: *b").unwrap();
        let copy = yaml.get("copy").unwrap();
        assert!(copy.is_mapping());
        assert_eq!(
            copy.get("x").unwrap().as_yaml(),
            Some(&Yaml::Integer(1))
        );
    }

    #[test]
    fn test_empty_document_is_null() {
        let yaml = parse("").unwrap();
        assert_eq!(yaml.as_yaml(), Some(&Yaml::Null));

        let yaml = parse_file("# only a comment\n", "empty.yml").unwrap();
        assert_eq!(yaml.as_yaml(), Some(&Yaml::Null));
        assert_eq!(yaml.source_info.file.as_deref(), Some("empty.yml"));
    }

    #[test]
    fn test_source_info_tracking() {
        let yaml = parse_file("title: x\nnested:\n  key: v", "config.yml").unwrap();
        let key = yaml.get("nested").unwrap().get("key").unwrap();
        assert_eq!(key.source_info.file.as_deref(), Some("config.yml"));
        assert_eq!(key.source_info.line, 3);
        assert_eq!(key.source_info.col, 8);
    }

    #[test]
    fn test_syntax_error_carries_file() {
        let err = parse_file("a: [1, 2", "bad.yml").unwrap_err();
        match err {
            Error::Syntax { location, .. } => {
                assert_eq!(location.unwrap().file.as_deref(), Some("bad.yml"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_tag_name_combination() {
        assert_eq!(tag_name("!", "env"), "env");
        assert_eq!(tag_name("!!", "str"), "tag:yaml.org,2002:str");
        assert_eq!(tag_name("tag:yaml.org,2002:", "int"), "tag:yaml.org,2002:int");
    }
}
