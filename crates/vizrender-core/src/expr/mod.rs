//! Restricted, safelisted expression evaluator.
//!
//! Parses a small arithmetic language (numbers, declared variables, `pi`,
//! `e`, `tau`, `+ - * / % ** ^` and a fixed set of math functions, with
//! `np.`/`math.` accepted as aliases). Nothing else is reachable: there is no
//! attribute access, indexing, assignment or string literal. Used in-process
//! for plot sampling and computed bindings, and transpiled to JS for
//! client-side plots.

mod ast;
mod error;
mod eval;
mod js;
mod lexer;
mod parser;

use std::collections::BTreeMap;

pub use error::{EvalError, ExprError};
pub use eval::{sample, sample_grid, Samples};
pub use lexer::normalize_source;
pub use parser::{MAX_DEPTH, MAX_EXPR_LEN};

/// A parsed expression bound to an ordered variable list.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    variables: Vec<String>,
    ast: ast::Expr,
}

impl Expression {
    /// Parse `src`, resolving identifiers against `variables`.
    ///
    /// Unknown identifiers, unknown functions and member access outside the
    /// `np.`/`math.` aliases are parse errors.
    pub fn parse(src: &str, variables: &[&str]) -> Result<Self, ExprError> {
        let ast = parser::parse_expr(src, variables)?;
        Ok(Self {
            variables: variables.iter().map(|v| v.to_string()).collect(),
            ast,
        })
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Evaluate with `values[i]` bound to `variables()[i]`.
    pub fn eval(&self, values: &[f64]) -> Result<f64, EvalError> {
        let v = eval::eval(&self.ast, values)?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(EvalError::NonFinite)
        }
    }

    /// Evaluate with variables looked up by name; missing names read as 0.
    pub fn eval_with(&self, env: &BTreeMap<String, f64>) -> Result<f64, EvalError> {
        let values: Vec<f64> = self
            .variables
            .iter()
            .map(|name| env.get(name).copied().unwrap_or(0.0))
            .collect();
        self.eval(&values)
    }

    /// JavaScript rendering; `var` produces the JS text reading a variable.
    pub fn to_js(&self, var: impl Fn(&str) -> String) -> String {
        let lookup = |i: usize| var(self.variables.get(i).map(String::as_str).unwrap_or(""));
        js::to_js(&self.ast, &lookup)
    }
}
