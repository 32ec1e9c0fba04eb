//! Dependency edges of a merged tree.
//!
//! A consumer is a node holding a `${...}` expression or a construction
//! directive; its producers are the paths those reference. References in
//! construction arguments count for the constructing node as well as for
//! the argument itself.
//!
//! The resolver does not need this graph to evaluate (it resolves on
//! demand), but it is the structure behind `confgraph graph` and gives an
//! evaluation order for diagnostics.

use crate::expr::references_in;
use crate::path::Path;
use crate::types::{CallArgs, CallTarget, Directive, NamePart, NameTemplate, Node, NodeKind, Scalar};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// consumer → producers, in document order.
    adjacency: IndexMap<Path, IndexSet<Path>>,
}

impl DependencyGraph {
    pub fn build(root: &Node) -> Self {
        let mut graph = Self::default();
        graph.visit(root, &Path::root(), &mut Vec::new());
        graph
    }

    /// `(consumer, producer)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.adjacency
            .iter()
            .flat_map(|(consumer, producers)| producers.iter().map(move |p| (consumer, p)))
    }

    pub fn producers(&self, consumer: &Path) -> impl Iterator<Item = &Path> {
        self.adjacency.get(consumer).into_iter().flatten()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Path> {
        self.adjacency.keys()
    }

    pub fn len(&self) -> usize {
        self.adjacency.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumers ordered so that each comes after the consumers it depends on.
    ///
    /// A producer path is satisfied by any consumer at, above or below it.
    /// On a cycle, returns the chain `[a, b, .., a]`.
    pub fn evaluation_order(&self) -> Result<Vec<Path>, Vec<Path>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut stack = Vec::new();
        for consumer in self.adjacency.keys() {
            self.order_from(consumer, &mut stack, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn order_from(
        &self,
        consumer: &Path,
        stack: &mut Vec<Path>,
        done: &mut HashSet<Path>,
        order: &mut Vec<Path>,
    ) -> Result<(), Vec<Path>> {
        if done.contains(consumer) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|p| p == consumer) {
            let mut cycle = stack[start..].to_vec();
            cycle.push(consumer.clone());
            return Err(cycle);
        }
        stack.push(consumer.clone());
        for producer in self.producers(consumer) {
            let dependencies: Vec<&Path> = self
                .adjacency
                .keys()
                .filter(|other| *other != consumer && (other.starts_with(producer) || producer.starts_with(other)))
                .collect();
            for dependency in dependencies {
                // A construction depends on its own arguments; that is not a cycle.
                if dependency.starts_with(consumer) {
                    continue;
                }
                self.order_from(dependency, stack, done, order)?;
            }
        }
        stack.pop();
        done.insert(consumer.clone());
        order.push(consumer.clone());
        Ok(())
    }

    fn add(&mut self, consumer: &Path, producer: Path) {
        self.adjacency.entry(consumer.clone()).or_default().insert(producer);
    }

    /// `owners` are the enclosing construction paths, innermost last.
    fn visit(&mut self, node: &Node, at: &Path, owners: &mut Vec<Path>) {
        match &node.kind {
            NodeKind::Scalar(Scalar::String(text)) => {
                for producer in references_in(text) {
                    self.add(at, producer.clone());
                    for owner in owners.iter() {
                        self.add(owner, producer.clone());
                    }
                }
            }
            NodeKind::Scalar(_) => {}
            NodeKind::Sequence(items) => self.visit_items(items, at, owners),
            NodeKind::Mapping(map) => self.visit_map(map, at, owners),
            NodeKind::Directive(directive) => match directive.as_ref() {
                Directive::Construct(call) => {
                    for producer in target_references(&call.target) {
                        self.add(at, producer.clone());
                        for owner in owners.iter() {
                            self.add(owner, producer.clone());
                        }
                    }
                    owners.push(at.clone());
                    match &call.args {
                        CallArgs::Positional(items) => self.visit_items(items, at, owners),
                        CallArgs::Keyword(map) => self.visit_map(map, at, owners),
                        CallArgs::Single(arg) => self.visit(arg, at, owners),
                        CallArgs::None => {}
                    }
                    owners.pop();
                }
                Directive::Env {
                    default: Some(default),
                    ..
                } => self.visit(default, at, owners),
                Directive::Patch(map) => self.visit_map(map, at, owners),
                Directive::Extend(items) => self.visit_items(items, at, owners),
                Directive::Env { default: None, .. } | Directive::Import(_) | Directive::Include(_) => {}
            },
        }
    }

    fn visit_items(&mut self, items: &[Node], at: &Path, owners: &mut Vec<Path>) {
        for (i, item) in items.iter().enumerate() {
            self.visit(item, &at.index(i), owners);
        }
    }

    fn visit_map(&mut self, map: &IndexMap<String, Node>, at: &Path, owners: &mut Vec<Path>) {
        for (key, value) in map {
            self.visit(value, &at.key(key.as_str()), owners);
        }
    }
}

/// Paths a construction target reads before it can be named.
fn target_references(target: &CallTarget) -> Vec<Path> {
    match target {
        CallTarget::Static(_) => Vec::new(),
        // `@obj.member` needs `obj`; `@name` needs `name`.
        CallTarget::Dynamic(NameTemplate::Reference(segments)) => {
            let keep = if segments.len() > 1 { segments.len() - 1 } else { segments.len() };
            vec![Path::from_keys(segments[..keep].iter().cloned())]
        }
        CallTarget::Dynamic(NameTemplate::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                NamePart::Reference(name) => Some(Path::from_keys([name.as_str()])),
                NamePart::Text(_) => None,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::node_from_yaml;
    use pretty_assertions::assert_eq;

    fn graph(text: &str) -> DependencyGraph {
        DependencyGraph::build(&node_from_yaml(&confgraph_yaml::parse(text).unwrap(), "test.yml").unwrap())
    }

    fn edges(graph: &DependencyGraph) -> Vec<String> {
        graph.edges().map(|(c, p)| format!("{c} -> {p}")).collect()
    }

    #[test]
    fn test_edges_from_expressions_and_arguments() {
        let graph = graph(
            "app: {name: x, version: 1}\n\
             title: '${app.name} v${app.version}'\n\
             model: !@pkg.Net {width: '${dims.w * 2}', opt: !@pkg.Opt ['${lr}']}\n\
             run: !$@model.fit\n",
        );
        assert_eq!(
            edges(&graph),
            vec![
                "title -> app.name",
                "title -> app.version",
                "model.width -> dims.w",
                "model -> dims.w",
                "model -> lr",
                "model.opt[0] -> lr",
                "model.opt -> lr",
                "run -> model",
            ]
        );
        assert_eq!(graph.producers(&Path::parse("model").unwrap()).count(), 2);
    }

    #[test]
    fn test_evaluation_order() {
        let graph = graph("c: '${b}'\nb: '${a}'\na: 1\nd: !$pkg.@c.Name");
        let order = graph.evaluation_order().unwrap();
        let order: Vec<String> = order.iter().map(Path::to_string).collect();
        assert_eq!(order, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_cycle_chain() {
        let graph = graph("x: '${y}'\ny: '${x}'");
        let cycle = graph.evaluation_order().unwrap_err();
        let cycle: Vec<String> = cycle.iter().map(Path::to_string).collect();
        assert_eq!(cycle, vec!["x", "y", "x"]);
    }

    #[test]
    fn test_plain_tree_has_no_edges() {
        assert!(graph("a: 1\nb: [x, y]\nc: !env {var: HOME, default: none}").is_empty());
    }
}
