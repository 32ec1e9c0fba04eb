//! YAML nodes with tag, style and source location tracking.

use crate::SourceInfo;
use yaml_rust2::Yaml;

/// Quoting style of a scalar as written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    /// Unquoted; subject to type inference.
    Plain,
    /// Single or double quoted, literal or folded block; always a string.
    Quoted,
}

/// A tag attached to a node.
///
/// `name` is the tag without its leading `!` for local tags (`env` for
/// `!env`, `@pkg.Class` for `!@pkg.Class`). Core-schema tags keep their
/// full form (`tag:yaml.org,2002:str`).
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub source_info: SourceInfo,
}

impl Tag {
    /// True for local (`!name`) tags, as opposed to core-schema tags.
    pub fn is_local(&self) -> bool {
        !self.name.starts_with("tag:yaml.org,2002:")
    }
}

/// The shape of a [`TaggedYaml`] node.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    /// A leaf. `value` is the inferred scalar, `text` the original lexeme.
    Scalar {
        value: Yaml,
        text: String,
        style: ScalarStyle,
    },

    Sequence(Vec<TaggedYaml>),

    /// Entries in document order. Duplicate keys are kept; consumers decide.
    Mapping(Vec<TaggedEntry>),
}

/// One key/value pair of a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEntry {
    pub key: TaggedYaml,
    pub value: TaggedYaml,
}

/// A YAML node with its tag and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedYaml {
    pub value: TaggedValue,
    pub tag: Option<Tag>,
    pub source_info: SourceInfo,
}

impl TaggedYaml {
    pub fn scalar(value: Yaml, text: impl Into<String>, source_info: SourceInfo) -> Self {
        Self {
            value: TaggedValue::Scalar {
                value,
                text: text.into(),
                style: ScalarStyle::Plain,
            },
            tag: None,
            source_info,
        }
    }

    pub fn null(source_info: SourceInfo) -> Self {
        Self::scalar(Yaml::Null, "", source_info)
    }

    /// Local tag name without the leading `!`, if this node has one.
    pub fn tag_name(&self) -> Option<&str> {
        self.tag
            .as_ref()
            .filter(|tag| tag.is_local())
            .map(|tag| tag.name.as_str())
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.value, TaggedValue::Scalar { .. })
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.value, TaggedValue::Sequence(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.value, TaggedValue::Mapping(_))
    }

    /// Original text of a scalar node.
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            TaggedValue::Scalar { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Inferred value of a scalar node.
    pub fn as_yaml(&self) -> Option<&Yaml> {
        match &self.value {
            TaggedValue::Scalar { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[TaggedYaml]> {
        match &self.value {
            TaggedValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[TaggedEntry]> {
        match &self.value {
            TaggedValue::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a mapping value by its key text. The last duplicate wins.
    pub fn get(&self, key: &str) -> Option<&TaggedYaml> {
        self.as_mapping()?
            .iter()
            .rev()
            .find(|entry| entry.key.text() == Some(key))
            .map(|entry| &entry.value)
    }

    /// Array length or mapping entry count; zero for scalars.
    pub fn len(&self) -> usize {
        match &self.value {
            TaggedValue::Scalar { .. } => 0,
            TaggedValue::Sequence(items) => items.len(),
            TaggedValue::Mapping(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
