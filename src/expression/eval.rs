//! Tree-walking interpreter for parsed expressions.

use std::cmp::Ordering;

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::Scope;
use crate::accessor::type_name;
use crate::error::ExpressionFailure;

type EvalResult = Result<Value, ExpressionFailure>;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Num::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(Num::Float))
            }
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

/// Null, `false` and zero are falsy; every other value is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

/// Text form used for string concatenation.
pub fn concat_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Loose equality: numbers compare numerically, numeric strings coerce.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(_), _) | (_, Value::Number(_)) => match (Num::of(left), Num::of(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (Num::of(left)?, Num::of(right)?) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        },
    }
}

/// Pairs to iterate for a collection value: `(index, item)` for lists,
/// `(key, value)` for maps.
pub fn iterate(value: &Value) -> Result<Vec<(Value, Value)>, ExpressionFailure> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item.clone()))
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), v.clone()))
            .collect()),
        Value::Null => Err(ExpressionFailure::NullCollection),
        other => Err(ExpressionFailure::NotIterable(type_name(other))),
    }
}

pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> EvalResult {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => scope
            .resolve(name)
            .ok_or_else(|| ExpressionFailure::Unresolved(name.clone())),
        Expr::Property(target, name) => {
            let target = evaluate(target, scope)?;
            if target.is_null() {
                return Err(ExpressionFailure::NullTarget(name.clone()));
            }
            scope
                .accessor()
                .get_attribute(&target, name)
                .ok_or_else(|| ExpressionFailure::Unresolved(name.clone()))
        }
        Expr::Index(target, key) => {
            let target = evaluate(target, scope)?;
            let key = evaluate(key, scope)?;
            index(&target, &key)
        }
        Expr::Call {
            target,
            method,
            args,
        } => {
            let target = evaluate(target, scope)?;
            let args = args
                .iter()
                .map(|a| evaluate(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(&target, method, &args)
        }
        Expr::Unary(UnaryOp::Not, operand) => {
            Ok(Value::Bool(!is_truthy(&evaluate(operand, scope)?)))
        }
        Expr::Unary(UnaryOp::Neg, operand) => {
            let v = evaluate(operand, scope)?;
            match Num::of(&v) {
                Some(Num::Int(i)) => Ok(i
                    .checked_neg()
                    .map(Value::from)
                    .unwrap_or_else(|| Num::Float(-(i as f64)).into_value())),
                Some(Num::Float(f)) => Ok(Num::Float(-f).into_value()),
                None => Err(ExpressionFailure::Type(format!(
                    "cannot negate {}",
                    type_name(&v)
                ))),
            }
        }
        Expr::Binary(left, BinaryOp::And, right) => {
            if !is_truthy(&evaluate(left, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&evaluate(right, scope)?)))
        }
        Expr::Binary(left, BinaryOp::Or, right) => {
            if is_truthy(&evaluate(left, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&evaluate(right, scope)?)))
        }
        Expr::Binary(left, op, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            binary(&left, *op, &right)
        }
    }
}

fn index(target: &Value, key: &Value) -> EvalResult {
    match (target, key) {
        (Value::Null, _) => Err(ExpressionFailure::NullTarget(concat_text(key))),
        (Value::Array(items), _) => match Num::of(key) {
            Some(Num::Int(i)) if i >= 0 => Ok(items.get(i as usize).cloned().unwrap_or(Value::Null)),
            _ => Err(ExpressionFailure::Type(format!(
                "list index must be a non-negative integer, found {}",
                type_name(key)
            ))),
        },
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Object(map), other) => Ok(map.get(&concat_text(other)).cloned().unwrap_or(Value::Null)),
        (other, _) => Err(ExpressionFailure::Type(format!(
            "cannot index into {}",
            type_name(other)
        ))),
    }
}

fn call(target: &Value, method: &str, args: &[Value]) -> EvalResult {
    if target.is_null() {
        return Err(ExpressionFailure::NullTarget(format!("{method}()")));
    }

    let mismatch = || {
        ExpressionFailure::Type(format!(
            "{method}() is not defined for {}",
            type_name(target)
        ))
    };
    let arg = |i: usize| {
        args.get(i).ok_or_else(|| {
            ExpressionFailure::Type(format!("{method}() expects {} argument(s)", i + 1))
        })
    };

    match method {
        "size" | "length" => match target {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            _ => Err(mismatch()),
        },
        "isEmpty" => match target {
            Value::String(s) => Ok(Value::Bool(s.is_empty())),
            Value::Array(items) => Ok(Value::Bool(items.is_empty())),
            Value::Object(map) => Ok(Value::Bool(map.is_empty())),
            _ => Err(mismatch()),
        },
        "trim" | "toUpperCase" | "toLowerCase" => {
            let Value::String(s) = target else {
                return Err(mismatch());
            };
            Ok(Value::String(match method {
                "trim" => s.trim().to_string(),
                "toUpperCase" => s.to_uppercase(),
                _ => s.to_lowercase(),
            }))
        }
        "contains" => {
            let needle = arg(0)?;
            match target {
                Value::String(s) => Ok(Value::Bool(s.contains(&concat_text(needle)))),
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| loose_eq(i, needle)))),
                Value::Object(map) => Ok(Value::Bool(map.contains_key(&concat_text(needle)))),
                _ => Err(mismatch()),
            }
        }
        "startsWith" | "endsWith" => {
            let Value::String(s) = target else {
                return Err(mismatch());
            };
            let affix = concat_text(arg(0)?);
            Ok(Value::Bool(if method == "startsWith" {
                s.starts_with(&affix)
            } else {
                s.ends_with(&affix)
            }))
        }
        _ => Err(ExpressionFailure::UnknownMethod(method.to_string())),
    }
}

fn binary(left: &Value, op: BinaryOp, right: &Value) -> EvalResult {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let ord = compare(left, right).ok_or_else(|| {
                ExpressionFailure::Type(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add if left.is_string() || right.is_string() => Ok(Value::String(format!(
            "{}{}",
            concat_text(left),
            concat_text(right)
        ))),
        _ => arithmetic(left, op, right),
    }
}

fn arithmetic(left: &Value, op: BinaryOp, right: &Value) -> EvalResult {
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(ExpressionFailure::Type(format!(
            "arithmetic on {} and {}",
            type_name(left),
            type_name(right)
        )));
    };

    let result = match (a, b) {
        (Num::Int(a), Num::Int(b)) => {
            let checked = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                    return Err(ExpressionFailure::DivisionByZero);
                }
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                _ => None,
            };
            match checked {
                Some(n) => Num::Int(n),
                None => Num::Float(float_op(a as f64, op, b as f64)),
            }
        }
        (a, b) => Num::Float(float_op(a.as_f64(), op, b.as_f64())),
    };
    Ok(result.into_value())
}

fn float_op(a: f64, op: BinaryOp, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    }
}
