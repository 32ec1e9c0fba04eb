//! Splitting scalar text into literal text and `${...}` spans.

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Text(String),
    Expr(String),
}

/// Result of scanning one scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    /// No spans; the text is used as-is.
    Literal(String),
    /// The whole scalar is exactly one span. Its value keeps its native type.
    Whole(String),
    /// Spans embedded in text. Every span is rendered to text and concatenated.
    Parts(Vec<Piece>),
}

impl Template {
    /// Source text of every span, in order.
    pub fn expressions(&self) -> Vec<&str> {
        match self {
            Template::Literal(_) => Vec::new(),
            Template::Whole(source) => vec![source.as_str()],
            Template::Parts(pieces) => pieces
                .iter()
                .filter_map(|piece| match piece {
                    Piece::Expr(source) => Some(source.as_str()),
                    Piece::Text(_) => None,
                })
                .collect(),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Template::Literal(_))
    }
}

/// Scan `text` for `${...}` spans.
///
/// Braces nest and quoted strings inside a span may contain `}`. An
/// unterminated `${` is kept as literal text.
pub fn scan(text: &str) -> Template {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        let body = &rest[start + 2..];
        let Some(end) = span_end(body) else {
            break;
        };
        literal.push_str(&rest[..start]);
        if !literal.is_empty() {
            pieces.push(Piece::Text(std::mem::take(&mut literal)));
        }
        pieces.push(Piece::Expr(body[..end].trim().to_string()));
        rest = &body[end + 1..];
    }
    literal.push_str(rest);

    if pieces.is_empty() {
        return Template::Literal(literal);
    }
    if !literal.is_empty() {
        pieces.push(Piece::Text(literal));
    }
    match pieces.as_slice() {
        [Piece::Expr(source)] => Template::Whole(source.clone()),
        _ => Template::Parts(pieces),
    }
}

/// Byte offset of the `}` closing a span whose body starts at `body`.
fn span_end(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_literal() {
        assert_eq!(scan("plain text"), Template::Literal("plain text".into()));
        assert_eq!(scan("cost: $5"), Template::Literal("cost: $5".into()));
    }

    #[test]
    fn test_whole_value() {
        assert_eq!(scan("${a.b}"), Template::Whole("a.b".into()));
        assert_eq!(scan("${ x + 1 }"), Template::Whole("x + 1".into()));
    }

    #[test]
    fn test_parts() {
        assert_eq!(
            scan("${app.name} v${app.version}"),
            Template::Parts(vec![
                Piece::Expr("app.name".into()),
                Piece::Text(" v".into()),
                Piece::Expr("app.version".into()),
            ])
        );
    }

    #[test]
    fn test_quoted_brace_does_not_close() {
        assert_eq!(
            scan("x=${'}' + a}!"),
            Template::Parts(vec![
                Piece::Text("x=".into()),
                Piece::Expr("'}' + a".into()),
                Piece::Text("!".into()),
            ])
        );
    }

    #[test]
    fn test_unterminated_span_is_literal() {
        assert_eq!(scan("a ${b"), Template::Literal("a ${b".into()));
        assert_eq!(
            scan("${a} ${b"),
            Template::Parts(vec![Piece::Expr("a".into()), Piece::Text(" ${b".into())])
        );
    }

    #[test]
    fn test_expressions() {
        assert_eq!(scan("${a}-${b}").expressions(), vec!["a", "b"]);
        assert!(scan("none").expressions().is_empty());
    }
}
