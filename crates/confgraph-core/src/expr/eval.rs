//! Expression evaluation.
//!
//! References are looked up through a [`Scope`], which is how the resolver
//! resolves producers on demand. A reference chain such as `a.b[0]` is
//! handed to the scope as one path so it can stop at the exact node; only
//! computed bases (`(x if c else y).name`) are navigated here.

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::{ConfigError, ResolutionFailure, Result};
use crate::path::Path;
use crate::types::DirectiveKind;
use crate::value::{Number, Value, compare};
use std::cmp::Ordering;

/// Where expression references are resolved.
pub trait Scope {
    fn lookup(&mut self, path: &Path) -> Result<Value>;
}

/// Evaluate `expr` (parsed from `source`) for the node at `at`.
pub fn evaluate<S: Scope + ?Sized>(expr: &Expr, source: &str, scope: &mut S, at: &Path) -> Result<Value> {
    Evaluator { scope, source, at }.eval(expr)
}

struct Evaluator<'a, S: Scope + ?Sized> {
    scope: &'a mut S,
    source: &'a str,
    at: &'a Path,
}

impl<S: Scope + ?Sized> Evaluator<'_, S> {
    fn fail(&self, reason: ResolutionFailure) -> ConfigError {
        ConfigError::resolution(self.at, DirectiveKind::Expression, reason)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        if let Some(path) = expr.reference_path() {
            return self.scope.lookup(&path);
        }
        match expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            // Names are always reference paths.
            Expr::Name(name) => self.scope.lookup(&Path::from_keys([name.as_str()])),
            Expr::Attribute(base, name) => {
                let base = self.eval(base)?;
                attribute_value(&base, name, self.source).map_err(|e| self.fail(e))
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                index_value(&base, &index, self.source).map_err(|e| self.fail(e))
            }
            Expr::List(items) => {
                let values = items.iter().map(|item| self.eval(item)).collect::<Result<Vec<_>>>()?;
                Ok(Value::List(values))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, &value).map_err(|e| self.fail(e))
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if left.truthy() { self.eval(right) } else { Ok(left) }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if left.truthy() { Ok(left) } else { self.eval(right) }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right, self.source).map_err(|e| self.fail(e))
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, operand) in rest {
                    let right = self.eval(operand)?;
                    let holds = binary(*op, &left, &right, self.source).map_err(|e| self.fail(e))?;
                    if !holds.truthy() {
                        return Ok(holds);
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Conditional {
                then,
                condition,
                otherwise,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::String(s.clone()),
    }
}

/// `base.name` on a mapping or object.
pub(crate) fn attribute_value(base: &Value, name: &str, reference: &str) -> std::result::Result<Value, ResolutionFailure> {
    base.attribute(name).ok_or_else(|| ResolutionFailure::MissingAttribute {
        reference: reference.to_string(),
        attribute: name.to_string(),
        type_name: base.type_name().to_string(),
    })
}

/// `base[index]`. Negative list indexes count from the end.
pub(crate) fn index_value(base: &Value, index: &Value, reference: &str) -> std::result::Result<Value, ResolutionFailure> {
    match base {
        Value::List(items) => {
            let position = list_position(index, items.len(), reference)?;
            Ok(items[position].clone())
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let position = list_position(index, chars.len(), reference)?;
            Ok(Value::String(chars[position].to_string()))
        }
        Value::Map(_) | Value::Object(_) => match index {
            Value::String(key) => attribute_value(base, key, reference),
            other => Err(ResolutionFailure::Type(format!(
                "{} keys must be strings, not '{}'",
                base.type_name(),
                other.type_name()
            ))),
        },
        other => Err(ResolutionFailure::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn list_position(index: &Value, len: usize, reference: &str) -> std::result::Result<usize, ResolutionFailure> {
    let Some(Number::Int(i)) = Number::of(index) else {
        return Err(ResolutionFailure::Type(format!(
            "indices must be integers, not '{}'",
            index.type_name()
        )));
    };
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let position = if i < 0 { i + signed_len } else { i };
    if position < 0 || position >= signed_len {
        return Err(ResolutionFailure::IndexOutOfRange {
            reference: reference.to_string(),
            index: i,
            len,
        });
    }
    usize::try_from(position).map_err(|_| ResolutionFailure::IndexOutOfRange {
        reference: reference.to_string(),
        index: i,
        len,
    })
}

fn unary(op: UnaryOp, value: &Value) -> std::result::Result<Value, ResolutionFailure> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!value.truthy()));
    }
    let bad_operand = || ResolutionFailure::Type(format!("bad operand type for unary {op}: '{}'", value.type_name()));
    match (op, Number::of(value).ok_or_else(bad_operand)?) {
        (UnaryOp::Neg, Number::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ResolutionFailure::Overflow(format!("-{i}"))),
        (UnaryOp::Neg, Number::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Number::Int(i)) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Number::Float(f)) => Ok(Value::Float(f)),
        (UnaryOp::Invert, Number::Int(i)) => Ok(Value::Int(!i)),
        _ => Err(bad_operand()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value, source: &str) -> std::result::Result<Value, ResolutionFailure> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| {
                ResolutionFailure::Type(format!(
                    "'{op}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => contains(right, left).map(Value::Bool),
        BinaryOp::NotIn => contains(right, left).map(|found| Value::Bool(!found)),
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
            _ => arithmetic(op, left, right, source),
        },
        BinaryOp::Mul => match (left, right) {
            (Value::String(text), count) | (count, Value::String(text)) if is_int(count) => {
                let n = repeat_count(count, text.len(), source)?;
                Ok(Value::String(text.repeat(n)))
            }
            (Value::List(items), count) | (count, Value::List(items)) if is_int(count) => {
                let n = repeat_count(count, items.len(), source)?;
                Ok(Value::List(
                    std::iter::repeat_n(items.iter(), n).flatten().cloned().collect(),
                ))
            }
            _ => arithmetic(op, left, right, source),
        },
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => bitwise(op, left, right),
        BinaryOp::Shl | BinaryOp::Shr => shift(op, left, right, source),
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod | BinaryOp::Pow => {
            arithmetic(op, left, right, source)
        }
        // Short-circuit operators never get here.
        BinaryOp::And | BinaryOp::Or => Ok(if left.truthy() == (op == BinaryOp::And) {
            right.clone()
        } else {
            left.clone()
        }),
    }
}

fn is_int(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_))
}

/// Largest string (in bytes) or list a repetition may build.
const MAX_REPEAT_LEN: usize = 1 << 26;

/// Number of copies for `sequence * count`. Negative counts give none.
fn repeat_count(value: &Value, len: usize, source: &str) -> std::result::Result<usize, ResolutionFailure> {
    let count = match Number::of(value) {
        Some(Number::Int(n)) => usize::try_from(n).unwrap_or(0),
        _ => 0,
    };
    if len == 0 {
        return Ok(0);
    }
    len.checked_mul(count)
        .filter(|total| *total <= MAX_REPEAT_LEN)
        .map(|_| count)
        .ok_or_else(|| ResolutionFailure::Overflow(source.to_string()))
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> ResolutionFailure {
    ResolutionFailure::Type(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn contains(container: &Value, item: &Value) -> std::result::Result<bool, ResolutionFailure> {
    match container {
        Value::List(items) => Ok(items.contains(item)),
        Value::Map(map) => Ok(item.as_str().is_some_and(|key| map.contains_key(key))),
        Value::String(text) => match item {
            Value::String(needle) => Ok(text.contains(needle.as_str())),
            other => Err(ResolutionFailure::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        other => Err(ResolutionFailure::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value, source: &str) -> std::result::Result<Value, ResolutionFailure> {
    match (Number::of(left), Number::of(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => int_arithmetic(op, a, b, source),
        (Some(a), Some(b)) => float_arithmetic(op, a.as_f64(), b.as_f64()),
        _ => Err(unsupported(op, left, right)),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64, source: &str) -> std::result::Result<Value, ResolutionFailure> {
    let overflow = || ResolutionFailure::Overflow(source.to_string());
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(ResolutionFailure::DivisionByZero);
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(ResolutionFailure::DivisionByZero);
            }
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            let inexact = a % b != 0 && ((a < 0) != (b < 0));
            Some(if inexact { quotient - 1 } else { quotient })
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(ResolutionFailure::DivisionByZero);
            }
            // Only `i64::MIN % -1` overflows, and its remainder is 0.
            let remainder = a.checked_rem(b).unwrap_or(0);
            Some(if remainder != 0 && ((remainder < 0) != (b < 0)) {
                remainder + b
            } else {
                remainder
            })
        }
        BinaryOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(ResolutionFailure::DivisionByZero);
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
        _ => None,
    };
    result.map(Value::Int).ok_or_else(overflow)
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> std::result::Result<Value, ResolutionFailure> {
    let needs_divisor = matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod);
    if needs_divisor && b == 0.0 {
        return Err(ResolutionFailure::DivisionByZero);
    }
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => {
            let remainder = a % b;
            if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                remainder + b
            } else {
                remainder
            }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ResolutionFailure::DivisionByZero);
            }
            a.powf(b)
        }
        _ => return Err(ResolutionFailure::Type(format!("unsupported float operator {op}"))),
    };
    Ok(Value::Float(result))
}

fn bitwise(op: BinaryOp, left: &Value, right: &Value) -> std::result::Result<Value, ResolutionFailure> {
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        let result = match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            _ => a ^ b,
        };
        return Ok(Value::Bool(result));
    }
    match (Number::of(left), Number::of(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => Ok(Value::Int(match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            _ => a ^ b,
        })),
        _ => Err(unsupported(op, left, right)),
    }
}

fn shift(op: BinaryOp, left: &Value, right: &Value, source: &str) -> std::result::Result<Value, ResolutionFailure> {
    let (Some(Number::Int(a)), Some(Number::Int(count))) = (Number::of(left), Number::of(right)) else {
        return Err(unsupported(op, left, right));
    };
    if count < 0 {
        return Err(ResolutionFailure::Type("negative shift count".into()));
    }
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    if op == BinaryOp::Shr {
        let shifted = if count >= 64 { if a < 0 { -1 } else { 0 } } else { a >> count };
        return Ok(Value::Int(shifted));
    }
    if a == 0 {
        return Ok(Value::Int(0));
    }
    if count >= 64 {
        return Err(ResolutionFailure::Overflow(source.to_string()));
    }
    let shifted = a << count;
    if shifted >> count != a {
        return Err(ResolutionFailure::Overflow(source.to_string()));
    }
    Ok(Value::Int(shifted))
}
