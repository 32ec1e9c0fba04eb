//! # confgraph-yaml
//!
//! YAML parsing that keeps what a plain YAML loader throws away: local tags
//! (`!env`, `!@pkg.Class`, `!include_from`, ...), scalar quoting style and the
//! source location of every node.
//!
//! The output is a [`TaggedYaml`] tree. Scalars carry both the inferred
//! `yaml-rust2` value and their original text, so a directive such as
//! `!env 5` can still see the variable name `"5"` while an argument payload
//! such as `!@int 5` sees the integer.
//!
//! ## Example
//!
//! ```rust
//! use confgraph_yaml::parse;
//!
//! let doc = parse("home: !env HOME").unwrap();
//! let home = doc.get("home").unwrap();
//! assert_eq!(home.tag_name(), Some("env"));
//! assert_eq!(home.text(), Some("HOME"));
//! ```

mod error;
mod parser;
mod source_info;
mod tagged;

pub use error::{Error, Result};
pub use parser::{parse, parse_file};
pub use source_info::SourceInfo;
pub use tagged::{ScalarStyle, Tag, TaggedEntry, TaggedValue, TaggedYaml};

// Re-exported so downstream crates can name scalar values without a direct dependency.
pub use yaml_rust2::Yaml;
