//! Capability gates for directives with external effects.
//!
//! A [`SecurityPolicy`] holds one pattern set per capability (environment
//! variables, imports, include paths) and a flag for expression evaluation.
//! In restrictive mode a request is allowed only when a pattern matches; in
//! permissive mode the patterns list what is refused.
//!
//! Patterns use shell-style globbing (`APP_*`, `builtins.*`,
//! `configs/*.yml`); a pattern that is not a valid glob only matches itself.

use crate::error::PolicyDenial;
use crate::registry::BUILTIN_MODULE;
use crate::source::normalize;
use serde::Deserialize;
use std::path::Path as FsPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    Restrictive,
    Permissive,
}

/// A set of exact names or glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<(String, Option<glob::Pattern>)>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: impl Into<String>) {
        let text = pattern.into();
        let compiled = glob::Pattern::new(&text).ok();
        self.patterns.push((text, compiled));
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|(text, compiled)| {
            text == candidate
                || compiled
                    .as_ref()
                    .is_some_and(|pattern| pattern.matches(candidate))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(text, _)| text.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for PatternSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = PatternSet::new();
        for pattern in iter {
            set.insert(pattern);
        }
        set
    }
}

/// Allow/deny configuration consulted before every effectful directive.
///
/// The default policy is fully restrictive: nothing is allowed until it
/// is listed.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub mode: PolicyMode,
    pub env: PatternSet,
    pub imports: PatternSet,
    pub includes: PatternSet,
    pub allow_expressions: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::restrictive()
    }
}

impl SecurityPolicy {
    /// Deny everything not explicitly allowed. Expressions are disabled.
    pub fn restrictive() -> Self {
        Self {
            mode: PolicyMode::Restrictive,
            env: PatternSet::new(),
            imports: PatternSet::new(),
            includes: PatternSet::new(),
            allow_expressions: false,
        }
    }

    /// Allow everything not explicitly listed. Expressions are enabled.
    pub fn permissive() -> Self {
        Self {
            mode: PolicyMode::Permissive,
            allow_expressions: true,
            ..Self::restrictive()
        }
    }

    pub fn allow_env(mut self, pattern: impl Into<String>) -> Self {
        self.env.insert(pattern);
        self
    }

    pub fn allow_import(mut self, pattern: impl Into<String>) -> Self {
        self.imports.insert(pattern);
        self
    }

    pub fn allow_include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.insert(pattern);
        self
    }

    pub fn with_expressions(mut self, allow: bool) -> Self {
        self.allow_expressions = allow;
        self
    }

    fn permits(&self, set: &PatternSet, candidates: &[&str]) -> bool {
        let matched = candidates.iter().any(|c| set.matches(c));
        match self.mode {
            PolicyMode::Restrictive => matched,
            PolicyMode::Permissive => !matched,
        }
    }

    pub fn check_env(&self, name: &str) -> Result<(), PolicyDenial> {
        if self.permits(&self.env, &[name]) {
            Ok(())
        } else {
            Err(PolicyDenial::Env(name.to_string()))
        }
    }

    /// `name` is the full dotted name being imported or constructed.
    /// Undotted names are also tried as `builtins.<name>`.
    pub fn check_import(&self, name: &str) -> Result<(), PolicyDenial> {
        let qualified = format!("{BUILTIN_MODULE}.{name}");
        let candidates = if name.contains('.') {
            vec![name]
        } else {
            vec![name, qualified.as_str()]
        };
        if self.permits(&self.imports, &candidates) {
            Ok(())
        } else {
            Err(PolicyDenial::Import(name.to_string()))
        }
    }

    /// Checks both the reference as written and the path it resolved to.
    /// `..` segments in the written form are collapsed before matching.
    pub fn check_include(&self, written: &str, resolved: &FsPath) -> Result<(), PolicyDenial> {
        let written = normalize(FsPath::new(written));
        let written_text = written.to_string_lossy();
        let resolved_text = resolved.to_string_lossy();
        if self.permits(&self.includes, &[written_text.as_ref(), resolved_text.as_ref()]) {
            Ok(())
        } else {
            Err(PolicyDenial::Include(resolved_text.into_owned()))
        }
    }

    pub fn check_expression(&self, expression: &str) -> Result<(), PolicyDenial> {
        if self.allow_expressions {
            Ok(())
        } else {
            Err(PolicyDenial::Expression(expression.to_string()))
        }
    }

    /// Read a policy from YAML.
    ///
    /// ```yaml
    /// mode: restrictive
    /// env: [HOME, "APP_*"]
    /// imports: ["builtins.*"]
    /// includes: ["configs/*"]
    /// allow_expressions: true
    /// ```
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        let file: PolicyFile = serde_yaml::from_str(text)?;
        Ok(file.into())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PolicyFile {
    mode: PolicyMode,
    env: Vec<String>,
    imports: Vec<String>,
    includes: Vec<String>,
    allow_expressions: Option<bool>,
}

impl From<PolicyFile> for SecurityPolicy {
    fn from(file: PolicyFile) -> Self {
        let base = match file.mode {
            PolicyMode::Restrictive => SecurityPolicy::restrictive(),
            PolicyMode::Permissive => SecurityPolicy::permissive(),
        };
        let allow_expressions = file.allow_expressions.unwrap_or(base.allow_expressions);
        SecurityPolicy {
            env: file.env.into_iter().collect(),
            imports: file.imports.into_iter().collect(),
            includes: file.includes.into_iter().collect(),
            allow_expressions,
            ..base
        }
    }
}
