//! Deep merge of unresolved trees.
//!
//! Merging is driven by the incoming value:
//!
//! | existing \ incoming  | mapping          | `!patch`          | `!extend`        | other   |
//! |----------------------|------------------|-------------------|------------------|---------|
//! | mapping              | recursive merge  | replace           | error            | replace |
//! | `!@` with keywords   | merge into kwargs| replace kwargs    | error            | replace |
//! | sequence             | replace          | error             | append           | replace |
//! | missing              | insert           | error             | error            | insert  |
//!
//! Anything else is replaced by the incoming value. A marker merged onto a
//! missing key is kept until the document lands on its base (its includes,
//! or the sources before it); one still present when a value is merged onto
//! it, or when loading finishes, had nothing to apply to.

use crate::error::{ConfigError, Result};
use crate::path::Path;
use crate::types::{CallArgs, Directive, DirectiveKind, Node, NodeKind};
use indexmap::IndexMap;

fn merge_error(at: &Path, directive: DirectiveKind, message: impl Into<String>) -> ConfigError {
    ConfigError::Merge {
        path: at.clone(),
        directive,
        message: message.into(),
    }
}

/// Merge `incoming` on top of `existing` at `at`.
pub fn merge_value(existing: Option<Node>, incoming: Node, at: &Path) -> Result<Node> {
    let Some(existing) = existing else {
        return Ok(incoming);
    };
    let existing = finish(existing, at)?;
    let Node { kind, source_info } = incoming;

    match kind {
        NodeKind::Directive(directive) => match *directive {
            Directive::Patch(map) => patch(existing, map, source_info, at),
            Directive::Extend(items) => match existing.kind {
                NodeKind::Sequence(mut base) => {
                    base.extend(items);
                    Ok(Node::new(NodeKind::Sequence(base), existing.source_info))
                }
                other => Err(merge_error(
                    at,
                    DirectiveKind::Extend,
                    format!("cannot extend a non-sequence value ({})", kind_name(&other)),
                )),
            },
            other => Ok(Node::directive(other, source_info)),
        },
        NodeKind::Mapping(overlay) => match existing.kind {
            NodeKind::Mapping(mut base) => {
                merge_mappings(&mut base, overlay, at)?;
                Ok(Node::new(NodeKind::Mapping(base), existing.source_info))
            }
            NodeKind::Directive(mut directive) => {
                let directive_kind = directive.kind();
                let Directive::Construct(call) = directive.as_mut() else {
                    return Ok(Node::new(NodeKind::Mapping(overlay), source_info));
                };
                call.args = match std::mem::replace(&mut call.args, CallArgs::None) {
                    CallArgs::Keyword(mut kwargs) => {
                        merge_mappings(&mut kwargs, overlay, at)?;
                        CallArgs::Keyword(kwargs)
                    }
                    CallArgs::None => CallArgs::Keyword(overlay),
                    _ => {
                        return Err(merge_error(
                            at,
                            directive_kind,
                            "cannot merge keyword arguments into a call with positional arguments",
                        ));
                    }
                };
                Ok(Node::new(NodeKind::Directive(directive), existing.source_info))
            }
            _ => Ok(Node::new(NodeKind::Mapping(overlay), source_info)),
        },
        kind => Ok(Node::new(kind, source_info)),
    }
}

fn patch(existing: Node, map: IndexMap<String, Node>, source_info: confgraph_yaml::SourceInfo, at: &Path) -> Result<Node> {
    match existing.kind {
        NodeKind::Mapping(_) => Ok(Node::new(NodeKind::Mapping(map), source_info)),
        NodeKind::Directive(mut directive) => match directive.as_mut() {
            Directive::Construct(call) => {
                call.args = CallArgs::Keyword(map);
                Ok(Node::new(NodeKind::Directive(directive), existing.source_info))
            }
            other => Err(merge_error(
                at,
                DirectiveKind::Patch,
                format!("cannot patch a {} directive", other.kind()),
            )),
        },
        other => Err(merge_error(
            at,
            DirectiveKind::Patch,
            format!("cannot patch a non-mapping value ({})", kind_name(&other)),
        )),
    }
}

fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Scalar(_) => "scalar",
        NodeKind::Sequence(_) => "sequence",
        NodeKind::Mapping(_) => "mapping",
        NodeKind::Directive(_) => "directive",
    }
}

/// Merge every entry of `overlay` into `base`, keeping `base`'s key order.
pub fn merge_mappings(base: &mut IndexMap<String, Node>, overlay: IndexMap<String, Node>, at: &Path) -> Result<()> {
    for (key, value) in overlay {
        let path = at.key(key.as_str());
        merge_entry(base, key, value, &path)?;
    }
    Ok(())
}

/// Merge one entry; a new key is appended.
pub(crate) fn merge_entry(map: &mut IndexMap<String, Node>, key: String, value: Node, at: &Path) -> Result<()> {
    match map.get_mut(&key) {
        Some(slot) => {
            let old = std::mem::replace(slot, Node::empty_mapping());
            *slot = merge_value(Some(old), value, at)?;
        }
        None => {
            map.insert(key, value);
        }
    }
    Ok(())
}

/// Merge documents left to right; later documents win.
pub fn merge_documents(documents: impl IntoIterator<Item = Node>) -> Result<Node> {
    let mut merged = Node::empty_mapping();
    for document in documents {
        merged = merge_value(Some(merged), document, &Path::root())?;
    }
    finish(merged, &Path::root())
}

/// Settle a tree in which every `!patch`/`!extend` must already have been
/// applied. A remaining marker is a MergeError at its path.
pub fn finish(node: Node, at: &Path) -> Result<Node> {
    if let Some((path, kind)) = unapplied_marker(&node, at) {
        let message = match kind {
            DirectiveKind::Patch => "nothing to patch: no earlier document defines this key",
            _ => "nothing to extend: no earlier document defines this key",
        };
        return Err(merge_error(&path, kind, message));
    }
    Ok(settle(node))
}

fn unapplied_marker(node: &Node, at: &Path) -> Option<(Path, DirectiveKind)> {
    match &node.kind {
        NodeKind::Scalar(_) => None,
        NodeKind::Sequence(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| unapplied_marker(item, &at.index(i))),
        NodeKind::Mapping(map) => map
            .iter()
            .find_map(|(key, value)| unapplied_marker(value, &at.key(key.as_str()))),
        NodeKind::Directive(directive) => match directive.as_ref() {
            Directive::Patch(_) => Some((at.clone(), DirectiveKind::Patch)),
            Directive::Extend(_) => Some((at.clone(), DirectiveKind::Extend)),
            Directive::Construct(call) => match &call.args {
                CallArgs::Keyword(map) => map
                    .iter()
                    .find_map(|(key, value)| unapplied_marker(value, &at.key(key.as_str()))),
                CallArgs::Positional(items) => items
                    .iter()
                    .enumerate()
                    .find_map(|(i, item)| unapplied_marker(item, &at.index(i))),
                CallArgs::Single(node) => unapplied_marker(node, at),
                CallArgs::None => None,
            },
            _ => None,
        },
    }
}

/// Turn leftover `!patch`/`!extend` markers into plain mappings/sequences.
pub fn settle(node: Node) -> Node {
    let Node { kind, source_info } = node;
    let kind = match kind {
        NodeKind::Scalar(_) => kind,
        NodeKind::Sequence(items) => NodeKind::Sequence(settle_items(items)),
        NodeKind::Mapping(map) => NodeKind::Mapping(settle_map(map)),
        NodeKind::Directive(directive) => match *directive {
            Directive::Patch(map) => NodeKind::Mapping(settle_map(map)),
            Directive::Extend(items) => NodeKind::Sequence(settle_items(items)),
            Directive::Construct(mut call) => {
                call.args = match call.args {
                    CallArgs::Positional(items) => CallArgs::Positional(settle_items(items)),
                    CallArgs::Keyword(map) => CallArgs::Keyword(settle_map(map)),
                    CallArgs::Single(node) => CallArgs::Single(Box::new(settle(*node))),
                    CallArgs::None => CallArgs::None,
                };
                NodeKind::Directive(Box::new(Directive::Construct(call)))
            }
            Directive::Env { var, default } => NodeKind::Directive(Box::new(Directive::Env {
                var,
                default: default.map(|node| Box::new(settle(*node))),
            })),
            other => NodeKind::Directive(Box::new(other)),
        },
    };
    Node::new(kind, source_info)
}

fn settle_items(items: Vec<Node>) -> Vec<Node> {
    items.into_iter().map(settle).collect()
}

fn settle_map(map: IndexMap<String, Node>) -> IndexMap<String, Node> {
    map.into_iter().map(|(key, node)| (key, settle(node))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::node_from_yaml;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> Node {
        node_from_yaml(&confgraph_yaml::parse(text).unwrap(), "test.yml").unwrap()
    }

    fn json(node: &Node) -> String {
        serde_json::to_string(node).unwrap()
    }

    #[test]
    fn test_later_document_wins() {
        let merged = merge_documents([doc("a: {x: 1, y: 2}\nb: 1"), doc("a: {y: 3}\nc: 4")]).unwrap();
        assert_eq!(json(&merged), r#"{"a":{"x":1,"y":3},"b":1,"c":4}"#);
    }

    #[test]
    fn test_extend_appends() {
        let merged = merge_documents([doc("base: [1, 2, 3]"), doc("base: !extend [4, 5]")]).unwrap();
        assert_eq!(json(&merged), r#"{"base":[1,2,3,4,5]}"#);
    }

    #[test]
    fn test_patch_replaces() {
        let merged = merge_documents([doc("m: {a: 1, b: 2}"), doc("m: !patch {a: 9}")]).unwrap();
        assert_eq!(json(&merged), r#"{"m":{"a":9}}"#);
    }

    #[test]
    fn test_patch_survives_later_partial_merge() {
        let merged = merge_documents([
            doc("m: {a: 1, b: 2}"),
            doc("m: !patch {a: 9}"),
            doc("m: {c: 3}"),
        ])
        .unwrap();
        assert_eq!(json(&merged), r#"{"m":{"a":9,"c":3}}"#);
    }

    #[test]
    fn test_markers_on_missing_keys_are_errors() {
        let err = merge_documents([doc("a: {x: 1}"), doc("b: !patch {x: 1}")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Merge);
        insta::assert_snapshot!(err.to_string(), @"merge error at b (!patch): nothing to patch: no earlier document defines this key");

        let err = merge_documents([doc("a: !extend [1]")]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"merge error at a (!extend): nothing to extend: no earlier document defines this key");

        let err = merge_documents([doc("c: {x: 1}"), doc("c: {d: !extend [2]}")]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"merge error at c.d (!extend): nothing to extend: no earlier document defines this key");
    }

    #[test]
    fn test_unapplied_marker_fails_when_merged_over() {
        let err = merge_documents([doc("a: !extend [1]"), doc("a: [2]")]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"merge error at a (!extend): nothing to extend: no earlier document defines this key");
    }

    #[test]
    fn test_mapping_merges_into_constructor_kwargs() {
        let merged = merge_documents([
            doc("model: !@pkg.Net {layers: 2, width: 8}"),
            doc("model: {width: 16}"),
        ])
        .unwrap();
        assert_eq!(json(&merged), r#"{"model":{"!@pkg.Net":{"layers":2,"width":16}}}"#);

        let merged = merge_documents([
            doc("model: !@pkg.Net {layers: 2, width: 8}"),
            doc("model: !patch {depth: 1}"),
        ])
        .unwrap();
        assert_eq!(json(&merged), r#"{"model":{"!@pkg.Net":{"depth":1}}}"#);
    }

    #[test]
    fn test_incompatible_markers() {
        let err = merge_documents([doc("a: {b: 1}"), doc("a: !extend [1]")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Merge);
        insta::assert_snapshot!(err.to_string(), @"merge error at a (!extend): cannot extend a non-sequence value (mapping)");

        let err = merge_documents([doc("a: [1]"), doc("a: !patch {b: 1}")]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"merge error at a (!patch): cannot patch a non-mapping value (sequence)");
    }
}
