//! confgraph CLI - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Format, LoadArgs};

#[derive(Parser)]
#[command(name = "confgraph")]
#[command(version)]
#[command(about = "Resolve declarative YAML configuration", long_about = None)]
struct Cli {
    /// Show debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge, override and resolve configuration files
    Resolve {
        #[command(flatten)]
        load: LoadArgs,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },

    /// Print the merged tree before resolution
    Merge {
        #[command(flatten)]
        load: LoadArgs,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },

    /// Print the dependency edges of the merged tree
    Graph {
        #[command(flatten)]
        load: LoadArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "confgraph=debug" } else { "confgraph=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Resolve { load, format } => commands::resolve::execute(load, format),
        Commands::Merge { load, format } => commands::merge::execute(load, format),
        Commands::Graph { load } => commands::graph::execute(load),
    }
}
