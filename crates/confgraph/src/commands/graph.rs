//! `confgraph graph`: print dependency edges and an evaluation order.

use anyhow::{Context, Result, bail};

use confgraph_core::{DependencyGraph, Path, apply_overrides, merge_sources};

use super::LoadArgs;

pub fn execute(args: LoadArgs) -> Result<()> {
    let options = args.options()?;
    let merged = merge_sources(&args.sources(), &options).context("failed to merge configuration")?;
    let tree = apply_overrides(merged, &options).context("failed to apply overrides")?;
    let graph = DependencyGraph::build(&tree);
    print!("{}", render(&graph)?);
    Ok(())
}

fn render(graph: &DependencyGraph) -> Result<String> {
    let mut out = String::new();
    for (consumer, producer) in graph.edges() {
        out.push_str(&format!("{consumer} -> {producer}\n"));
    }
    match graph.evaluation_order() {
        Ok(order) => {
            let order: Vec<String> = order.iter().map(Path::to_string).collect();
            out.push_str(&format!("order: {}\n", order.join(", ")));
            Ok(out)
        }
        Err(cycle) => {
            let cycle: Vec<String> = cycle.iter().map(Path::to_string).collect();
            bail!("circular reference: {}", cycle.join(" -> "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confgraph_core::{LoadOptions, Source};
    use pretty_assertions::assert_eq;

    fn graph(text: &str) -> DependencyGraph {
        let tree = merge_sources(&[Source::text("t.yml", text)], &LoadOptions::new()).unwrap();
        DependencyGraph::build(&tree)
    }

    #[test]
    fn test_render_edges_and_order() {
        let out = render(&graph("a: 1\nb: '${a}'\nc: '${b} ${a}'")).unwrap();
        assert_eq!(out, "b -> a\nc -> b\nc -> a\norder: b, c\n");
    }

    #[test]
    fn test_render_cycle() {
        let err = render(&graph("a: '${b}'\nb: '${a}'")).unwrap_err();
        assert_eq!(err.to_string(), "circular reference: a -> b -> a");
    }
}
