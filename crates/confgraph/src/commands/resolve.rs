//! `confgraph resolve`: print the fully resolved configuration.

use anyhow::{Context, Result};
use tracing::info;

use confgraph_core::load;

use super::{Format, LoadArgs, print};

pub fn execute(args: LoadArgs, format: Format) -> Result<()> {
    let options = args.options()?;
    let sources = args.sources();
    let resolved = load(sources, &options).context("failed to resolve configuration")?;
    info!(instances = resolved.instances.len(), "configuration resolved");
    print(&resolved.config, format)
}
