use super::ast::{BinaryOp, Expr, Func};

/// Render `expr` as a JavaScript expression over `Math.*`.
///
/// `var` maps a variable index to the JS text that reads it.
pub(crate) fn to_js(expr: &Expr, var: &dyn Fn(usize) -> String) -> String {
    match expr {
        Expr::Num(v) => format!("({v:?})"),
        Expr::Var(i) => var(*i),
        Expr::Neg(e) => format!("(-{})", to_js(e, var)),
        Expr::Binary { op, left, right } => {
            let l = to_js(left, var);
            let r = to_js(right, var);
            match op {
                BinaryOp::Add => format!("({l} + {r})"),
                BinaryOp::Sub => format!("({l} - {r})"),
                BinaryOp::Mul => format!("({l} * {r})"),
                BinaryOp::Div => format!("({l} / {r})"),
                BinaryOp::Mod => format!("({l} - {r} * Math.floor({l} / {r}))"),
                BinaryOp::Pow => format!("Math.pow({l}, {r})"),
            }
        }
        Expr::Call { func, args } => {
            let a: Vec<String> = args.iter().map(|e| to_js(e, var)).collect();
            match (func, a.as_slice()) {
                (Func::Log, [x, base]) => format!("(Math.log({x}) / Math.log({base}))"),
                _ => format!("{}({})", js_function(*func), a.join(", ")),
            }
        }
    }
}

fn js_function(func: Func) -> &'static str {
    match func {
        Func::Sin => "Math.sin",
        Func::Cos => "Math.cos",
        Func::Tan => "Math.tan",
        Func::Asin => "Math.asin",
        Func::Acos => "Math.acos",
        Func::Atan => "Math.atan",
        Func::Atan2 => "Math.atan2",
        Func::Sinh => "Math.sinh",
        Func::Cosh => "Math.cosh",
        Func::Tanh => "Math.tanh",
        Func::Exp => "Math.exp",
        Func::Ln | Func::Log => "Math.log",
        Func::Log10 => "Math.log10",
        Func::Log2 => "Math.log2",
        Func::Sqrt => "Math.sqrt",
        Func::Abs => "Math.abs",
        Func::Floor => "Math.floor",
        Func::Ceil => "Math.ceil",
        Func::Round => "Math.round",
        Func::Min => "Math.min",
        Func::Max => "Math.max",
        Func::Pow => "Math.pow",
        Func::Sign => "Math.sign",
    }
}
