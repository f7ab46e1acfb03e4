use super::ast::{constant, BinaryOp, Expr, Func};
use super::error::ExprError;
use super::lexer::{lex, Span, Token, TokenKind};

/// Longest accepted source text, in bytes.
pub const MAX_EXPR_LEN: usize = 1024;
/// Deepest accepted nesting of unary operators, powers and parentheses.
pub const MAX_DEPTH: usize = 64;

/// Module prefixes accepted as aliases (`np.sin`, `math.pi`).
const MODULE_PREFIXES: [&str; 2] = ["np", "math"];

pub(crate) fn parse_expr(src: &str, variables: &[&str]) -> Result<Expr, ExprError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ExprError::new(0, "empty expression"));
    }
    if src.len() > MAX_EXPR_LEN {
        return Err(ExprError::new(
            MAX_EXPR_LEN,
            format!("expression longer than {MAX_EXPR_LEN} bytes"),
        ));
    }
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
        variables,
    };
    let expr = p.parse_additive()?;
    p.expect(TokenKind::Eof)?;
    Ok(expr)
}

struct Parser<'v> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    variables: &'v [&'v str],
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if t.kind != TokenKind::Eof {
            self.pos += 1;
        }
        t
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ExprError> {
        if self.peek().kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(ExprError::new(
                self.span().start,
                format!("expected {kind:?}, found {:?}", self.peek().kind),
            ))
        }
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::new(
                self.span().start,
                "expression nested too deeply",
            ));
        }
        Ok(())
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut e = self.parse_multiplicative()?;
        loop {
            let op = if self.consume(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.consume(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let r = self.parse_multiplicative()?;
            e = binary(op, e, r);
        }
        Ok(e)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut e = self.parse_unary()?;
        loop {
            let op = if self.consume(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.consume(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.consume(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let r = self.parse_unary()?;
            e = binary(op, e, r);
        }
        Ok(e)
    }

    /// Unary signs bind looser than `**`, so `-x**2` is `-(x**2)`.
    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        self.descend()?;
        let e = if self.consume(TokenKind::Minus) {
            Expr::Neg(Box::new(self.parse_unary()?))
        } else if self.consume(TokenKind::Plus) {
            self.parse_unary()?
        } else {
            self.parse_power()?
        };
        self.depth -= 1;
        Ok(e)
    }

    /// Right associative: `2**3**2` is `2**(3**2)`.
    fn parse_power(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_primary()?;
        if self.consume(TokenKind::StarStar) || self.consume(TokenKind::Caret) {
            let exp = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let t = self.bump();
        match t.kind {
            TokenKind::Number(v) => Ok(Expr::Num(v)),
            TokenKind::Ident(name) => self.parse_name(name, t.span),
            TokenKind::LParen => {
                let e = self.parse_additive()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            other => Err(ExprError::new(
                t.span.start,
                format!("unexpected token {other:?}"),
            )),
        }
    }

    fn parse_name(&mut self, name: String, span: Span) -> Result<Expr, ExprError> {
        if self.consume(TokenKind::Dot) {
            if !MODULE_PREFIXES.contains(&name.as_str()) {
                return Err(ExprError::new(span.start, "member access is not allowed"));
            }
            let member = self.bump();
            let TokenKind::Ident(member_name) = member.kind else {
                return Err(ExprError::new(
                    member.span.start,
                    format!("expected name after '{name}.'"),
                ));
            };
            if self.peek().kind == TokenKind::LParen {
                return self.parse_call(&member_name, member.span);
            }
            return constant(&member_name).map(Expr::Num).ok_or_else(|| {
                ExprError::new(
                    member.span.start,
                    format!("unknown name '{name}.{member_name}'"),
                )
            });
        }

        if self.peek().kind == TokenKind::LParen {
            return self.parse_call(&name, span);
        }

        if let Some(index) = self.variables.iter().position(|v| *v == name) {
            return Ok(Expr::Var(index));
        }
        constant(&name)
            .map(Expr::Num)
            .ok_or_else(|| ExprError::new(span.start, format!("unknown identifier '{name}'")))
    }

    fn parse_call(&mut self, name: &str, span: Span) -> Result<Expr, ExprError> {
        let func = Func::from_name(name)
            .ok_or_else(|| ExprError::new(span.start, format!("unknown function '{name}'")))?;
        self.expect(TokenKind::LParen)?;
        self.descend()?;

        let mut args = Vec::new();
        if !self.consume(TokenKind::RParen) {
            loop {
                args.push(self.parse_additive()?);
                if self.consume(TokenKind::Comma) {
                    continue;
                }
                self.expect(TokenKind::RParen)?;
                break;
            }
        }
        self.depth -= 1;

        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(ExprError::new(
                span.start,
                format!("{name}() takes {min}..={max} arguments, got {}", args.len()),
            ));
        }
        Ok(Expr::Call { func, args })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_arithmetic_precedence() {
        match parse_expr("1+2*3", &[]).unwrap() {
            Expr::Binary {
                op: BinaryOp::Add, ..
            } => {}
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_unary_minus_binds_looser_than_power() {
        match parse_expr("-x**2", &["x"]).unwrap() {
            Expr::Neg(inner) => assert!(matches!(
                *inner,
                Expr::Binary {
                    op: BinaryOp::Pow,
                    ..
                }
            )),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_resolves_module_aliases() {
        match parse_expr("np.sin(x) + math.pi", &["x"]).unwrap() {
            Expr::Binary { left, right, .. } => {
                assert!(matches!(
                    *left,
                    Expr::Call {
                        func: Func::Sin,
                        ..
                    }
                ));
                assert_eq!(*right, Expr::Num(std::f64::consts::PI));
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_other_member_access() {
        let err = parse_expr("os.system(1)", &[]).unwrap_err();
        assert!(err.message.contains("member access"));
        assert!(parse_expr("np.load(x)", &["x"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!(parse_expr("eval(x)", &["x"]).is_err());
        let err = parse_expr("y + 1", &["x"]).unwrap_err();
        assert_eq!(err.offset, 0);
        assert!(err.message.contains("'y'"));
    }

    #[test]
    fn test_checks_arity() {
        assert!(parse_expr("atan2(x)", &["x"]).is_err());
        assert!(parse_expr("log(x, 2)", &["x"]).is_ok());
        assert!(parse_expr("sin()", &[]).is_err());
    }

    #[test]
    fn test_variables_shadow_constants() {
        assert_eq!(parse_expr("e", &["e"]).unwrap(), Expr::Var(0));
    }

    #[test]
    fn test_enforces_limits() {
        let deep = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert!(parse_expr(&deep, &["x"]).is_err());

        let long = vec!["x"; 600].join("+");
        assert!(parse_expr(&long, &["x"]).is_err());
    }
}
