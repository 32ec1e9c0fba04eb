//! `confgraph merge`: print the merged tree with directives still in place.

use anyhow::{Context, Result};

use confgraph_core::{apply_overrides, merge_sources};

use super::{Format, LoadArgs, print};

pub fn execute(args: LoadArgs, format: Format) -> Result<()> {
    let options = args.options()?;
    let merged = merge_sources(&args.sources(), &options).context("failed to merge configuration")?;
    let tree = apply_overrides(merged, &options).context("failed to apply overrides")?;
    print(&tree, format)
}
