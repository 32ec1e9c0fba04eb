//! Expression trees.

use crate::path::Path;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    /// Comparison operators chain: `a < b < c` means `a < b and b < c`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::In
                | BinaryOp::NotIn
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        };
        f.write_str(text)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Attribute(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Two or more chained comparisons. Each operand is evaluated once.
    Compare {
        first: Box<Expr>,
        rest: Vec<(BinaryOp, Expr)>,
    },
    /// `then if condition else otherwise`
    Conditional {
        then: Box<Expr>,
        condition: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// The structural path this expression names, if it is a chain of
    /// names, attributes and non-negative literal indexes.
    pub fn reference_path(&self) -> Option<Path> {
        match self {
            Expr::Name(name) => Some(Path::from_keys([name.as_str()])),
            Expr::Attribute(base, name) => Some(base.reference_path()?.key(name.as_str())),
            Expr::Index(base, index) => match index.as_ref() {
                Expr::Literal(Literal::Int(i)) if *i >= 0 => {
                    Some(base.reference_path()?.index(usize::try_from(*i).ok()?))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// A lone reference. These are allowed even when expressions are disabled.
    pub fn is_bare_reference(&self) -> bool {
        self.reference_path().is_some()
    }

    /// Every maximal reference path in the tree, in source order.
    pub fn references(&self) -> Vec<Path> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Path>) {
        if let Some(path) = self.reference_path() {
            out.push(path);
            return;
        }
        match self {
            Expr::Literal(_) | Expr::Name(_) => {}
            Expr::Attribute(base, _) | Expr::Unary(_, base) => base.collect_references(out),
            Expr::Index(base, index) => {
                base.collect_references(out);
                index.collect_references(out);
            }
            Expr::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Expr::Binary(_, left, right) => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Expr::Compare { first, rest } => {
                first.collect_references(out);
                for (_, operand) in rest {
                    operand.collect_references(out);
                }
            }
            Expr::Conditional {
                then,
                condition,
                otherwise,
            } => {
                then.collect_references(out);
                condition.collect_references(out);
                otherwise.collect_references(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.into()))
    }

    #[test]
    fn test_reference_path() {
        let expr = Expr::Attribute(
            Box::new(Expr::Index(
                Box::new(Expr::Attribute(name("model"), "layers".into())),
                Box::new(Expr::Literal(Literal::Int(1))),
            )),
            "size".into(),
        );
        assert_eq!(expr.reference_path(), Path::parse("model.layers[1].size"));
        assert!(expr.is_bare_reference());
    }

    #[test]
    fn test_computed_index_is_not_a_path() {
        let expr = Expr::Index(name("items"), name("i"));
        assert_eq!(expr.reference_path(), None);
        assert_eq!(
            expr.references(),
            vec![Path::parse("items").unwrap(), Path::parse("i").unwrap()]
        );
    }

    #[test]
    fn test_references_in_operators() {
        let expr = Expr::Conditional {
            then: Box::new(Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Attribute(name("a"), "b".into())),
                Box::new(Expr::Literal(Literal::Int(1))),
            )),
            condition: name("flag"),
            otherwise: Box::new(Expr::Literal(Literal::Null)),
        };
        assert!(!expr.is_bare_reference());
        assert_eq!(
            expr.references(),
            vec![Path::parse("a.b").unwrap(), Path::parse("flag").unwrap()]
        );
    }
}
