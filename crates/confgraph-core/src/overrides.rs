//! Post-merge overrides of the form `prefix.path.to.key=value`.
//!
//! The value is parsed as a YAML fragment, so tagged values such as
//! `!extend [4]` or `!patch {a: 1}` work; anything that is not valid YAML
//! is taken as a plain string. All overrides are collected into one
//! document which is merged on top of the merged tree.

use crate::convert::node_from_yaml;
use crate::error::{ConfigError, Result};
use crate::types::{Node, NodeKind};
use indexmap::IndexMap;
use tracing::debug;

pub const DEFAULT_PREFIX: &str = "confgraph";

/// One parsed override.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub keys: Vec<String>,
    pub value: Node,
}

/// Parse `prefix.a.b=value`.
pub fn parse_override(text: &str, prefix: &str) -> Result<Override> {
    let invalid = |message: String| ConfigError::Override {
        text: text.to_string(),
        message,
    };
    let Some((key, value)) = text.split_once('=') else {
        return Err(invalid("expected `key=value`".into()));
    };
    let Some(path) = key.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('.')) else {
        return Err(invalid(format!("key must start with `{prefix}.`")));
    };
    let keys: Vec<String> = path.split('.').map(str::to_string).collect();
    if keys.iter().any(String::is_empty) {
        return Err(invalid(format!("empty segment in key `{key}`")));
    }

    let value = match confgraph_yaml::parse(value) {
        Ok(yaml) => node_from_yaml(&yaml, "<override>")?,
        Err(_) => Node::string(value),
    };
    Ok(Override { keys, value })
}

/// Arguments of the current process that look like overrides.
pub fn process_overrides(prefix: &str) -> Vec<String> {
    select_overrides(std::env::args().skip(1), prefix)
}

/// Whether `arg` starts with `prefix.` and contains `=`.
pub fn is_override(arg: &str, prefix: &str) -> bool {
    arg.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.')) && arg.contains('=')
}

/// Keep the arguments that look like overrides.
pub fn select_overrides(args: impl IntoIterator<Item = String>, prefix: &str) -> Vec<String> {
    args.into_iter().filter(|arg| is_override(arg, prefix)).collect()
}

/// Collect overrides into one nested document. A later override of the
/// same key replaces an earlier one.
pub fn overrides_document(overrides: &[String], prefix: &str) -> Result<Node> {
    let mut root = IndexMap::new();
    for text in overrides {
        let Override { keys, value } = parse_override(text, prefix)?;
        debug!(override = %text, "applying override");
        insert_at(&mut root, &keys, value);
    }
    Ok(Node::mapping(root))
}

fn insert_at(map: &mut IndexMap<String, Node>, keys: &[String], value: Node) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut current = map;
    for key in parents {
        let slot = current.entry(key.clone()).or_insert_with(Node::empty_mapping);
        if !slot.is_mapping() {
            *slot = Node::empty_mapping();
        }
        let NodeKind::Mapping(next) = &mut slot.kind else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge_documents, merge_value, settle};
    use crate::path::Path;
    use crate::types::{Directive, Scalar};
    use pretty_assertions::assert_eq;

    fn json(node: &Node) -> String {
        serde_json::to_string(node).unwrap()
    }

    #[test]
    fn test_value_types() {
        let parsed = parse_override("confgraph.train.epochs=20", DEFAULT_PREFIX).unwrap();
        assert_eq!(parsed.keys, vec!["train", "epochs"]);
        assert_eq!(parsed.value.kind, NodeKind::Scalar(Scalar::Int(20)));

        let parsed = parse_override("confgraph.name=hello world", DEFAULT_PREFIX).unwrap();
        assert_eq!(parsed.value.as_str(), Some("hello world"));

        let parsed = parse_override("confgraph.items=!extend [4, 5]", DEFAULT_PREFIX).unwrap();
        assert!(matches!(parsed.value.as_directive(), Some(Directive::Extend(items)) if items.len() == 2));

        let parsed = parse_override("confgraph.bad=[unclosed", DEFAULT_PREFIX).unwrap();
        assert_eq!(parsed.value.as_str(), Some("[unclosed"));
    }

    #[test]
    fn test_malformed_overrides() {
        let err = parse_override("confgraph.a", DEFAULT_PREFIX).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"invalid override `confgraph.a`: expected `key=value`");
        let err = parse_override("other.a=1", DEFAULT_PREFIX).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"invalid override `other.a=1`: key must start with `confgraph.`");
        assert!(parse_override("confgraph.a..b=1", DEFAULT_PREFIX).is_err());
    }

    #[test]
    fn test_select_overrides() {
        let args = ["run", "confgraph.a=1", "confgraph.b", "x=2", "confgraph.c.d=e=f"].map(String::from);
        assert_eq!(
            select_overrides(args, DEFAULT_PREFIX),
            vec!["confgraph.a=1".to_string(), "confgraph.c.d=e=f".to_string()]
        );
    }

    #[test]
    fn test_overrides_merge_on_top() {
        let yaml = confgraph_yaml::parse("train: {epochs: 10, lr: 0.1}\nitems: [1, 2]\nmodel: {a: 1, b: 2}").unwrap();
        let base = merge_documents([node_from_yaml(&yaml, "base.yml").unwrap()]).unwrap();
        let overrides = overrides_document(
            &[
                "confgraph.train.epochs=20".into(),
                "confgraph.items=!extend [3]".into(),
                "confgraph.model=!patch {c: 3}".into(),
                "confgraph.new.key=x".into(),
            ],
            DEFAULT_PREFIX,
        )
        .unwrap();
        let merged = settle(merge_value(Some(base), overrides, &Path::root()).unwrap());
        assert_eq!(
            json(&merged),
            r#"{"train":{"epochs":20,"lr":0.1},"items":[1,2,3],"model":{"c":3},"new":{"key":"x"}}"#
        );
    }

    #[test]
    fn test_later_override_replaces_scalar_parent() {
        let doc = overrides_document(&["confgraph.a=1".into(), "confgraph.a.b=2".into()], DEFAULT_PREFIX).unwrap();
        assert_eq!(json(&doc), r#"{"a":{"b":2}}"#);
    }
}
