use super::error::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(f64),

    LParen,
    RParen,
    Comma,
    Dot,

    Plus,
    Minus,
    Star,
    StarStar,
    Caret,
    Slash,
    Percent,

    Eof,
}

pub(crate) fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut out = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        // Number: [0-9]+(.[0-9]*)?([eE][+-]?[0-9]+)? or .[0-9]+(...)
        if c.is_ascii_digit()
            || (c == '.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit())
        {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }

            if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
                let e_pos = i;
                i += 1;
                if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
                    i += 1;
                }
                let exp_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if exp_start == i {
                    return Err(ExprError::new(
                        e_pos,
                        "invalid number exponent (expected digits)",
                    ));
                }
            }

            let v: f64 = input[start..i]
                .parse()
                .map_err(|_| ExprError::new(start, "invalid number"))?;
            if !v.is_finite() {
                return Err(ExprError::new(start, "number literal out of range"));
            }
            out.push(Token {
                kind: TokenKind::Number(v),
                span: Span { start, end: i },
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push(Token {
                kind: TokenKind::Ident(input[start..i].to_owned()),
                span: Span { start, end: i },
            });
            continue;
        }

        if input[i..].starts_with("**") {
            i += 2;
            out.push(Token {
                kind: TokenKind::StarStar,
                span: Span { start, end: i },
            });
            continue;
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '^' => TokenKind::Caret,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            _ => {
                let shown = input[start..].chars().next().unwrap_or(c);
                return Err(ExprError::new(
                    start,
                    format!("unexpected character '{shown}'"),
                ));
            }
        };
        i += 1;
        out.push(Token {
            kind,
            span: Span { start, end: i },
        });
    }

    out.push(Token {
        kind: TokenKind::Eof,
        span: Span {
            start: input.len(),
            end: input.len(),
        },
    });
    Ok(out)
}

/// Canonical text of an expression: its tokens separated by single spaces.
///
/// Falls back to whitespace collapsing when the text does not lex, so that
/// invalid expressions still fingerprint stably.
pub fn normalize_source(src: &str) -> String {
    match lex(src.trim()) {
        Ok(tokens) => {
            let src = src.trim();
            tokens
                .iter()
                .filter(|t| t.kind != TokenKind::Eof)
                .map(|t| &src[t.span.start..t.span.end])
                .collect::<Vec<_>>()
                .join(" ")
        }
        Err(_) => src.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lexes_power_operators() {
        assert_eq!(
            kinds("x**2^3"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::StarStar,
                TokenKind::Number(2.0),
                TokenKind::Caret,
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexes_numbers() {
        assert_eq!(kinds("1.5e3")[0], TokenKind::Number(1500.0));
        assert_eq!(kinds(".25")[0], TokenKind::Number(0.25));
        assert_eq!(kinds("2.")[0], TokenKind::Number(2.0));
    }

    #[test]
    fn test_rejects_bad_exponent_and_overflow() {
        assert!(lex("1e").is_err());
        assert!(lex("1e999").is_err());
    }

    #[test]
    fn test_rejects_foreign_characters() {
        let err = lex("x; __import__").unwrap_err();
        assert_eq!(err.offset, 1);
        assert!(lex("x[0]").is_err());
        assert!(lex("'a'").is_err());
    }

    #[test]
    fn test_normalizes_whitespace_between_tokens() {
        assert_eq!(normalize_source("  x**2 +\t3*x "), "x ** 2 + 3 * x");
        assert_eq!(normalize_source("x ** 2 + 3 * x"), "x ** 2 + 3 * x");
        assert_eq!(normalize_source("x  ;  y"), "x ; y");
    }
}
