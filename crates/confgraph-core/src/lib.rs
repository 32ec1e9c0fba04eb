//! Declarative configuration resolution.
//!
//! A configuration is one or more YAML documents extended with directives:
//!
//! - `include!: [a.yml, b.yml]`, `!include`, `!include_at` and
//!   `!include_from` compose documents;
//! - `!extend` and `!patch` pick a merge strategy for one key;
//! - `${a.b}` and `${a.b * 2 if c else 0}` reference and compute values;
//! - `!env`, `!import`, `!@dotted.Name` and `!$@instance.method` read the
//!   environment, import symbols, construct objects and invoke members.
//!
//! Every effect is gated by a [`SecurityPolicy`]; the default denies all of
//! them.
//!
//! # Architecture
//!
//! - [`convert`]: tagged YAML → unresolved [`Node`] tree
//! - [`include`] and [`merge`]: include graph expansion and deep merge
//! - [`overrides`]: `confgraph.key=value` overrides on the merged tree
//! - [`expr`]: the `${...}` language
//! - [`resolve`]: memoised, dependency-ordered resolution that drives
//!   construction through the [`CapabilityRegistry`]
//! - [`graph`]: the dependency edges, for diagnostics
//!
//! # Example
//!
//! ```rust
//! use confgraph_core::{LoadOptions, MemorySource, SecurityPolicy, Value, load};
//!
//! let mut documents = MemorySource::new();
//! documents
//!     .add("base.yml", "app: {name: X}")
//!     .add("main.yml", "include!: [base.yml]\napp: {version: '1.0'}\ntitle: '${app.name} v${app.version}'");
//!
//! let options = LoadOptions::new()
//!     .with_policy(SecurityPolicy::restrictive().allow_include("*.yml"))
//!     .with_documents(documents);
//! let config = load(["main.yml"], &options).unwrap();
//! assert_eq!(config.get("title"), Some(&Value::from("X v1.0")));
//! ```

pub mod convert;
pub mod error;
pub mod expr;
pub mod graph;
pub mod include;
pub mod load;
pub mod merge;
pub mod overrides;
pub mod path;
pub mod registry;
pub mod resolve;
pub mod security;
pub mod source;
pub mod types;
pub mod value;

pub use convert::node_from_yaml;
pub use error::{
    ConfigError, ConstructionFailure, ErrorKind, IncludeFailure, PolicyDenial, ResolutionFailure, Result,
};
pub use graph::DependencyGraph;
pub use load::{LoadOptions, Source, apply_overrides, load, merge_sources, resolve_tree};
pub use merge::{merge_documents, merge_value, settle};
pub use path::{Path, Segment};
pub use registry::{Arguments, Capability, CapabilityRegistry, InvocationError, Symbol};
pub use resolve::{ResolvedConfig, Resolver};
pub use security::{PolicyMode, SecurityPolicy};
pub use source::{DocumentSource, FileSystemSource, MemorySource};
pub use types::{Directive, DirectiveKind, Node, NodeKind, Scalar};
pub use value::{Object, Value};
