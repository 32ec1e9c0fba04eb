//! The `${...}` reference and expression language.
//!
//! A scalar is first [`scan`]ned into a [`Template`]. Each span is then
//! parsed into an [`Expr`] and evaluated against a [`Scope`]:
//!
//! - `${a.b}` alone keeps the native type of the referenced value;
//! - `"val=${a.b}"` renders every span with [`Value::to_text`](crate::Value::to_text)
//!   and concatenates.

mod ast;
mod eval;
mod lexer;
mod parser;
mod template;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use eval::{Scope, evaluate};
pub(crate) use eval::{attribute_value, index_value};
pub use parser::{ParseError, parse};
pub use template::{Piece, Template, scan};

use crate::path::Path;

/// Reference paths used by every parsable span of `text`.
///
/// Spans that fail to parse contribute nothing; they are reported when
/// the node is evaluated.
pub fn references_in(text: &str) -> Vec<Path> {
    scan(text)
        .expressions()
        .into_iter()
        .filter_map(|source| parse(source).ok())
        .flat_map(|expr| expr.references())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_in() {
        let refs = references_in("${app.name} v${app.version + 1} ${bad +}");
        assert_eq!(
            refs,
            vec![Path::parse("app.name").unwrap(), Path::parse("app.version").unwrap()]
        );
        assert!(references_in("no spans").is_empty());
    }
}
