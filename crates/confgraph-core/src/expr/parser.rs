//! Pratt parser for `${...}` expressions.

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::lexer::{Token, tokenize};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the expression source.
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for ParseError {}

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

const PREC_NOT: u8 = 30;
const PREC_UNARY: u8 = 110;

struct TokenStream {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, offset)| *offset)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(token) => self.error(format!("expected {what}, found {token:?}")),
            None => self.error(format!("expected {what}, found end of expression")),
        }
    }
}

/// Parse one complete expression.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source).map_err(|offset| ParseError {
        message: "unexpected character".into(),
        offset,
    })?;
    if tokens.is_empty() {
        return Err(ParseError {
            message: "empty expression".into(),
            offset: 0,
        });
    }
    let mut stream = TokenStream {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parse_expression(&mut stream)?;
    if stream.peek().is_some() {
        return Err(stream.unexpected("end of expression"));
    }
    Ok(expr)
}

/// Get binary operator metadata (precedence, associativity, operator, token count).
fn binary_op_info(stream: &TokenStream) -> Option<(u8, Assoc, BinaryOp, usize)> {
    let info = match stream.peek()? {
        Token::Or => (10, Assoc::Left, BinaryOp::Or),
        Token::And => (20, Assoc::Left, BinaryOp::And),
        Token::EqEq => (40, Assoc::Left, BinaryOp::Eq),
        Token::NotEq => (40, Assoc::Left, BinaryOp::Ne),
        Token::Lt => (40, Assoc::Left, BinaryOp::Lt),
        Token::LtEq => (40, Assoc::Left, BinaryOp::Le),
        Token::Gt => (40, Assoc::Left, BinaryOp::Gt),
        Token::GtEq => (40, Assoc::Left, BinaryOp::Ge),
        Token::In => (40, Assoc::Left, BinaryOp::In),
        Token::Not if stream.peek_nth(1) == Some(&Token::In) => {
            return Some((40, Assoc::Left, BinaryOp::NotIn, 2));
        }
        Token::Pipe => (50, Assoc::Left, BinaryOp::BitOr),
        Token::Caret => (60, Assoc::Left, BinaryOp::BitXor),
        Token::Amp => (70, Assoc::Left, BinaryOp::BitAnd),
        Token::Shl => (80, Assoc::Left, BinaryOp::Shl),
        Token::Shr => (80, Assoc::Left, BinaryOp::Shr),
        Token::Plus => (90, Assoc::Left, BinaryOp::Add),
        Token::Minus => (90, Assoc::Left, BinaryOp::Sub),
        Token::Star => (100, Assoc::Left, BinaryOp::Mul),
        Token::Slash => (100, Assoc::Left, BinaryOp::Div),
        Token::DoubleSlash => (100, Assoc::Left, BinaryOp::FloorDiv),
        Token::Percent => (100, Assoc::Left, BinaryOp::Mod),
        Token::DoubleStar => (120, Assoc::Right, BinaryOp::Pow),
        _ => return None,
    };
    Some((info.0, info.1, info.2, 1))
}

/// `then if condition else otherwise`, the loosest form.
fn parse_expression(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let then = parse_pratt(stream, 0)?;
    if stream.peek() != Some(&Token::If) {
        return Ok(then);
    }
    stream.advance();
    let condition = parse_pratt(stream, 0)?;
    stream.expect(Token::Else, "`else`")?;
    let otherwise = parse_expression(stream)?;
    Ok(Expr::Conditional {
        then: Box::new(then),
        condition: Box::new(condition),
        otherwise: Box::new(otherwise),
    })
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let mut left = parse_prefix(stream)?;

    while let Some((prec, assoc, op, width)) = binary_op_info(stream) {
        if prec < min_prec {
            break;
        }
        for _ in 0..width {
            stream.advance();
        }
        let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
        let right = parse_pratt(stream, next_prec)?;
        if !op.is_comparison() {
            left = Expr::Binary(op, Box::new(left), Box::new(right));
            continue;
        }

        let mut rest = vec![(op, right)];
        while let Some((_, _, next, width)) = binary_op_info(stream).filter(|(_, _, op, _)| op.is_comparison()) {
            for _ in 0..width {
                stream.advance();
            }
            rest.push((next, parse_pratt(stream, next_prec)?));
        }
        left = match <[(BinaryOp, Expr); 1]>::try_from(rest) {
            Ok([(op, right)]) => Expr::Binary(op, Box::new(left), Box::new(right)),
            Err(rest) => Expr::Compare {
                first: Box::new(left),
                rest,
            },
        };
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let (op, operand_prec) = match stream.peek() {
        Some(Token::Not) => (UnaryOp::Not, PREC_NOT),
        Some(Token::Minus) => (UnaryOp::Neg, PREC_UNARY),
        Some(Token::Plus) => (UnaryOp::Pos, PREC_UNARY),
        Some(Token::Tilde) => (UnaryOp::Invert, PREC_UNARY),
        _ => return parse_postfix(stream),
    };
    stream.advance();
    let operand = parse_pratt(stream, operand_prec)?;
    Ok(Expr::Unary(op, Box::new(operand)))
}

fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut expr = parse_atom(stream)?;

    loop {
        match stream.peek() {
            Some(Token::Dot) => {
                stream.advance();
                match stream.advance() {
                    Some(Token::Ident(field)) => {
                        expr = Expr::Attribute(Box::new(expr), field);
                    }
                    _ => return Err(stream.error("expected attribute name after `.`")),
                }
            }
            Some(Token::LBracket) => {
                stream.advance();
                let index = parse_expression(stream)?;
                stream.expect(Token::RBracket, "`]`")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            }
            Some(Token::LParen) => {
                return Err(stream.error("function calls are not supported in expressions"));
            }
            _ => break,
        }
    }

    Ok(expr)
}

fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let offset = stream.offset();
    let expr = match stream.advance() {
        Some(Token::Int(i)) => Expr::Literal(Literal::Int(i)),
        Some(Token::Float(f)) => Expr::Literal(Literal::Float(f)),
        Some(Token::Str(s)) => Expr::Literal(Literal::Str(s)),
        Some(Token::True) => Expr::Literal(Literal::Bool(true)),
        Some(Token::False) => Expr::Literal(Literal::Bool(false)),
        Some(Token::Null) => Expr::Literal(Literal::Null),
        Some(Token::Ident(name)) => Expr::Name(name),
        Some(Token::LParen) => {
            let inner = parse_expression(stream)?;
            stream.expect(Token::RParen, "`)`")?;
            inner
        }
        Some(Token::LBracket) => {
            let mut items = Vec::new();
            while stream.peek() != Some(&Token::RBracket) {
                items.push(parse_expression(stream)?);
                if stream.peek() == Some(&Token::Comma) {
                    stream.advance();
                } else {
                    break;
                }
            }
            stream.expect(Token::RBracket, "`]`")?;
            Expr::List(items)
        }
        Some(token) => {
            return Err(ParseError {
                message: format!("unexpected {token:?}"),
                offset,
            });
        }
        None => return Err(stream.error("unexpected end of expression")),
    };
    Ok(expr)
}
