use std::collections::BTreeMap;

use super::ast::{BinaryOp, Expr, Func};
use super::error::EvalError;
use super::Expression;

pub(crate) fn eval(expr: &Expr, vars: &[f64]) -> Result<f64, EvalError> {
    let v = match expr {
        Expr::Num(v) => *v,
        Expr::Var(i) => vars.get(*i).copied().unwrap_or(f64::NAN),
        Expr::Neg(e) => -eval(e, vars)?,
        Expr::Binary { op, left, right } => {
            let l = eval(left, vars)?;
            let r = eval(right, vars)?;
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => {
                    if r == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    l / r
                }
                // Floored modulo: the result takes the sign of the divisor.
                BinaryOp::Mod => {
                    if r == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    l - r * (l / r).floor()
                }
                BinaryOp::Pow => l.powf(r),
            }
        }
        Expr::Call { func, args } => {
            let a = args
                .iter()
                .map(|e| eval(e, vars))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, &a)?
        }
    };
    Ok(v)
}

fn call(func: Func, a: &[f64]) -> Result<f64, EvalError> {
    let x = a.first().copied().unwrap_or(f64::NAN);
    let y = a.get(1).copied().unwrap_or(f64::NAN);
    Ok(match func {
        Func::Sin => x.sin(),
        Func::Cos => x.cos(),
        Func::Tan => x.tan(),
        Func::Asin => x.asin(),
        Func::Acos => x.acos(),
        Func::Atan => x.atan(),
        Func::Atan2 => x.atan2(y),
        Func::Sinh => x.sinh(),
        Func::Cosh => x.cosh(),
        Func::Tanh => x.tanh(),
        Func::Exp => x.exp(),
        Func::Ln => x.ln(),
        Func::Log if a.len() == 2 => {
            let base = y.ln();
            if base == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            x.ln() / base
        }
        Func::Log => x.ln(),
        Func::Log10 => x.log10(),
        Func::Log2 => x.log2(),
        Func::Sqrt => x.sqrt(),
        Func::Abs => x.abs(),
        Func::Floor => x.floor(),
        Func::Ceil => x.ceil(),
        Func::Round => x.round(),
        Func::Min => a.iter().copied().fold(f64::INFINITY, f64::min),
        Func::Max => a.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Func::Pow => x.powf(y),
        Func::Sign => {
            if x == 0.0 {
                0.0
            } else {
                x.signum()
            }
        }
    })
}

/// Sampled curve. A `None` y is a gap where evaluation faulted.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub x: Vec<f64>,
    pub y: Vec<Option<f64>>,
}

impl Samples {
    pub fn gaps(&self) -> usize {
        self.y.iter().filter(|y| y.is_none()).count()
    }
}

/// `2 * per_side + 1` evenly spaced points over `[lo, hi]`.
pub fn sample_grid(domain: [f64; 2], per_side: u32) -> Vec<f64> {
    let [lo, hi] = domain;
    let n = 2 * per_side as usize;
    (0..=n)
        .map(|i| {
            if i == n {
                hi
            } else {
                lo + (hi - lo) * (i as f64) / (n as f64)
            }
        })
        .collect()
}

/// Evaluate `expr` over the grid for `variable`, holding every other
/// variable at its value in `fixed`.
///
/// Points where evaluation fails become gaps. Fails only when no point at
/// all evaluates, returning the first error seen.
pub fn sample(
    expr: &Expression,
    variable: &str,
    domain: [f64; 2],
    per_side: u32,
    fixed: &BTreeMap<String, f64>,
) -> Result<Samples, EvalError> {
    let mut values: Vec<f64> = expr
        .variables()
        .iter()
        .map(|name| fixed.get(name).copied().unwrap_or(0.0))
        .collect();
    let slot = expr.variables().iter().position(|v| v == variable);

    let x = sample_grid(domain, per_side);
    let mut y = Vec::with_capacity(x.len());
    let mut first_error = None;

    for &xi in &x {
        if let Some(slot) = slot {
            values[slot] = xi;
        }
        match expr.eval(&values) {
            Ok(v) => y.push(Some(v)),
            Err(e) => {
                first_error.get_or_insert(e);
                y.push(None);
            }
        }
    }

    match first_error {
        Some(e) if y.iter().all(Option::is_none) => Err(e),
        _ => Ok(Samples { x, y }),
    }
}
