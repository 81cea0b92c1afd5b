use serde_json::Value;

use super::lexer::Op;
use super::parser::{Function, Node};
use super::{Bindings, ExprError};

pub(crate) fn evaluate(node: &Node, bindings: &Bindings) -> Result<Value, ExprError> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::eval(format!("missing variable '{name}'"))),
        Node::Not(inner) => match evaluate(inner, bindings)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(mismatch_unary("!", &other)),
        },
        Node::Neg(inner) => {
            let v = evaluate(inner, bindings)?;
            let n = as_number(&v).ok_or_else(|| mismatch_unary("-", &v))?;
            number(-n)
        }
        Node::Binary(Op::And, lhs, rhs) => {
            if !truth(Op::And, &evaluate(lhs, bindings)?)? {
                return Ok(Value::Bool(false));
            }
            truth(Op::And, &evaluate(rhs, bindings)?).map(Value::Bool)
        }
        Node::Binary(Op::Or, lhs, rhs) => {
            if truth(Op::Or, &evaluate(lhs, bindings)?)? {
                return Ok(Value::Bool(true));
            }
            truth(Op::Or, &evaluate(rhs, bindings)?).map(Value::Bool)
        }
        Node::Binary(op, lhs, rhs) => {
            let l = evaluate(lhs, bindings)?;
            let r = evaluate(rhs, bindings)?;
            binary(*op, &l, &r)
        }
        Node::Call(function, args) => {
            let values = args
                .iter()
                .map(|a| evaluate(a, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &values)
        }
    }
}

fn binary(op: Op, l: &Value, r: &Value) -> Result<Value, ExprError> {
    match op {
        Op::Eq => Ok(Value::Bool(loose_eq(l, r))),
        Op::Ne => Ok(Value::Bool(!loose_eq(l, r))),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let ordering = compare(l, r).ok_or_else(|| mismatch(op, l, r))?;
            Ok(Value::Bool(match op {
                Op::Lt => ordering.is_lt(),
                Op::Le => ordering.is_le(),
                Op::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        Op::Add => match (l, r) {
            (Value::Number(_), Value::Number(_)) => arithmetic(op, l, r),
            (Value::String(a), other) | (other, Value::String(a)) => {
                let other = scalar_text(other).ok_or_else(|| mismatch(op, l, r))?;
                Ok(Value::String(if matches!(l, Value::String(_)) {
                    format!("{a}{other}")
                } else {
                    format!("{other}{a}")
                }))
            }
            _ => Err(mismatch(op, l, r)),
        },
        Op::Sub | Op::Mul | Op::Div | Op::Rem => arithmetic(op, l, r),
        Op::And | Op::Or | Op::Not => Err(mismatch(op, l, r)),
    }
}

fn arithmetic(op: Op, l: &Value, r: &Value) -> Result<Value, ExprError> {
    let (a, b) = match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch(op, l, r)),
    };
    let result = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div | Op::Rem if b == 0.0 => return Err(ExprError::eval("division by zero")),
        Op::Div => a / b,
        _ => a % b,
    };
    number(result)
}

fn truth(op: Op, v: &Value) -> Result<bool, ExprError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(mismatch_unary(op.symbol(), other)),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_number(l), as_number(r)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => as_number(l)?.partial_cmp(&as_number(r)?),
    }
}

/// Numbers pass through; strings holding a number are coerced.
pub(crate) fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integral results become JSON integers so `6 / 2` renders as `3`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn number(n: f64) -> Result<Value, ExprError> {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExprError::eval("result is not a finite number"))
}

fn call(function: Function, args: &[Value]) -> Result<Value, ExprError> {
    let arg = |i: usize| args.get(i).unwrap_or(&Value::Null);
    let text = |i: usize| -> Result<String, ExprError> {
        scalar_text(arg(i)).ok_or_else(|| {
            ExprError::eval(format!(
                "{}() expects a string, got {}",
                function.name(),
                type_name(arg(i))
            ))
        })
    };

    match function {
        Function::ToInt | Function::ToFloat => {
            let n = as_number(arg(0)).ok_or_else(|| {
                ExprError::eval(format!(
                    "{}() cannot convert {}",
                    function.name(),
                    type_name(arg(0))
                ))
            })?;
            number(if function == Function::ToInt { n.trunc() } else { n })
        }
        Function::ToString => Ok(Value::String(match arg(0) {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        Function::Len => match arg(0) {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(ExprError::eval(format!("len() of {}", type_name(other)))),
        },
        Function::Contains => match arg(0) {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| loose_eq(i, arg(1))))),
            _ => Ok(Value::Bool(text(0)?.contains(&text(1)?))),
        },
        Function::StartsWith => Ok(Value::Bool(text(0)?.starts_with(&text(1)?))),
        Function::EndsWith => Ok(Value::Bool(text(0)?.ends_with(&text(1)?))),
        Function::Lower => Ok(Value::String(text(0)?.to_lowercase())),
        Function::Upper => Ok(Value::String(text(0)?.to_uppercase())),
    }
}

pub(crate) const fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(op: Op, l: &Value, r: &Value) -> ExprError {
    ExprError::eval(format!(
        "operator '{}' cannot be applied to {} and {}",
        op.symbol(),
        type_name(l),
        type_name(r)
    ))
}

fn mismatch_unary(op: &str, v: &Value) -> ExprError {
    ExprError::eval(format!("operator '{op}' cannot be applied to {}", type_name(v)))
}
