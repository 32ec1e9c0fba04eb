//! Command implementations for the confgraph CLI
//!
//! Every command loads the same way: positional inputs are split into
//! files and `confgraph.key=value` overrides, and the flags below build
//! the security policy.

pub mod graph;
pub mod merge;
pub mod resolve;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use serde::Serialize;

use confgraph_core::overrides::{DEFAULT_PREFIX, is_override};
use confgraph_core::{LoadOptions, PolicyMode, SecurityPolicy, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Yaml,
    Json,
}

/// Inputs and policy shared by every command
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Configuration files (later files win) and `confgraph.key=value` overrides
    #[arg(required = true, value_name = "FILE|OVERRIDE")]
    pub inputs: Vec<String>,

    /// Override a value after merging (KEY=VALUE, KEY without the prefix)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// YAML security policy file
    #[arg(long, value_name = "FILE", conflicts_with = "permissive")]
    pub policy: Option<PathBuf>,

    /// Allow every capability that is not explicitly denied
    #[arg(long)]
    pub permissive: bool,

    /// Allow reading environment variables matching PATTERN
    #[arg(long, value_name = "PATTERN")]
    pub allow_env: Vec<String>,

    /// Allow importing and constructing symbols matching PATTERN
    #[arg(long, value_name = "PATTERN")]
    pub allow_import: Vec<String>,

    /// Allow including files matching PATTERN
    #[arg(long, value_name = "PATTERN")]
    pub allow_include: Vec<String>,

    /// Allow `${...}` expressions beyond bare references
    #[arg(long)]
    pub allow_expressions: bool,

    /// Maximum nesting depth during resolution
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,
}

impl LoadArgs {
    /// Files in command-line order.
    pub fn sources(&self) -> Vec<Source> {
        self.inputs
            .iter()
            .filter(|input| !is_override(input, DEFAULT_PREFIX))
            .map(|input| Source::File(PathBuf::from(input)))
            .collect()
    }

    /// Positional overrides first, then `--set` values in order.
    pub fn overrides(&self) -> Vec<String> {
        let positional = self
            .inputs
            .iter()
            .filter(|input| is_override(input, DEFAULT_PREFIX))
            .cloned();
        let set = self.set.iter().map(|kv| format!("{DEFAULT_PREFIX}.{kv}"));
        positional.chain(set).collect()
    }

    pub fn policy(&self) -> Result<SecurityPolicy> {
        let mut policy = match &self.policy {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read policy file {}", path.display()))?;
                SecurityPolicy::from_yaml_str(&text)
                    .with_context(|| format!("invalid policy file {}", path.display()))?
            }
            None if self.permissive => SecurityPolicy::permissive(),
            None => SecurityPolicy::restrictive(),
        };

        let has_allow_patterns =
            !(self.allow_env.is_empty() && self.allow_import.is_empty() && self.allow_include.is_empty());
        if policy.mode == PolicyMode::Permissive && has_allow_patterns {
            bail!("--allow-env, --allow-import and --allow-include need a restrictive policy");
        }
        for pattern in &self.allow_env {
            policy = policy.allow_env(pattern);
        }
        for pattern in &self.allow_import {
            policy = policy.allow_import(pattern);
        }
        for pattern in &self.allow_include {
            policy = policy.allow_include(pattern);
        }
        if self.allow_expressions {
            policy = policy.with_expressions(true);
        }
        Ok(policy)
    }

    pub fn options(&self) -> Result<LoadOptions> {
        let mut options = LoadOptions::new().with_policy(self.policy()?);
        for text in self.overrides() {
            options = options.with_override(text);
        }
        if let Some(max_depth) = self.max_depth {
            options = options.with_max_depth(max_depth);
        }
        Ok(options)
    }
}

/// Render `value` to stdout.
pub fn print<T: Serialize>(value: &T, format: Format) -> Result<()> {
    let text = match format {
        Format::Yaml => serde_yaml::to_string(value).context("failed to write YAML")?,
        Format::Json => {
            let mut text = serde_json::to_string_pretty(value).context("failed to write JSON")?;
            text.push('\n');
            text
        }
    };
    print!("{text}");
    Ok(())
}
