//! Tree-walking evaluation of expression ASTs.
//!
//! Evaluation is synchronous: every secret the expression can touch has
//! already been memoised into the [`EvalContext`] by the template layer.
//! Semantics follow the JavaScript dialect the spans are written in —
//! `+` concatenates when either side is a string, missing properties
//! evaluate to `null`, and boolean operators coerce by truthiness.

use super::ExprError;
use super::context::EvalContext;
use super::parser::{BinaryOp, Expr, UnaryOp};
use serde_json::Value;

const MAX_DEPTH: usize = 64;

/// The reserved binding name for the lazy secret accessor.
pub const SECRETS_BINDING: &str = "secrets";

/// Evaluate an expression against a context.
pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, ExprError> {
    eval_at(expr, ctx, 0)
}

fn eval_at(expr: &Expr, ctx: &EvalContext, depth: usize) -> Result<Value, ExprError> {
    if depth > MAX_DEPTH {
        return Err(ExprError::Eval("expression nesting too deep".to_string()));
    }
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Ident(name) => {
            if name == SECRETS_BINDING {
                return Err(ExprError::Eval(
                    "secrets can only be read via property access (secrets.KEY)".to_string(),
                ));
            }
            Ok(ctx.binding(name).cloned().unwrap_or(Value::Null))
        }

        Expr::Property { object, name } => {
            if let Expr::Ident(base) = object.as_ref() {
                if base == SECRETS_BINDING {
                    return ctx.secret(name);
                }
            }
            let value = eval_at(object, ctx, depth + 1)?;
            Ok(access_property(&value, name))
        }

        Expr::Index { object, index } => {
            if let Expr::Ident(base) = object.as_ref() {
                if base == SECRETS_BINDING {
                    let key = eval_at(index, ctx, depth + 1)?;
                    let Value::String(key) = key else {
                        return Err(ExprError::Eval(
                            "secret keys must be strings".to_string(),
                        ));
                    };
                    return ctx.secret(&key);
                }
            }
            let value = eval_at(object, ctx, depth + 1)?;
            let index = eval_at(index, ctx, depth + 1)?;
            access_index(&value, &index)
        }

        Expr::Unary { op, operand } => {
            let value = eval_at(operand, ctx, depth + 1)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match value.as_f64() {
                    Some(f) => Ok(number(-f)),
                    None => Err(ExprError::type_error("number", &value)),
                },
            }
        }

        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => {
                let lhs = eval_at(left, ctx, depth + 1)?;
                if !truthy(&lhs) {
                    return Ok(Value::Bool(false));
                }
                let rhs = eval_at(right, ctx, depth + 1)?;
                Ok(Value::Bool(truthy(&rhs)))
            }
            BinaryOp::Or => {
                let lhs = eval_at(left, ctx, depth + 1)?;
                if truthy(&lhs) {
                    return Ok(Value::Bool(true));
                }
                let rhs = eval_at(right, ctx, depth + 1)?;
                Ok(Value::Bool(truthy(&rhs)))
            }
            _ => {
                let lhs = eval_at(left, ctx, depth + 1)?;
                let rhs = eval_at(right, ctx, depth + 1)?;
                eval_binary(*op, &lhs, &rhs)
            }
        },

        Expr::Ternary {
            condition,
            then_branch,
            else_branch,
        } => {
            let chosen = if truthy(&eval_at(condition, ctx, depth + 1)?) {
                then_branch
            } else {
                else_branch
            };
            eval_at(chosen, ctx, depth + 1)
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Add => {
            if lhs.is_string() || rhs.is_string() {
                return Ok(Value::String(format!(
                    "{}{}",
                    super::stringify(lhs),
                    super::stringify(rhs)
                )));
            }
            numeric_op(lhs, rhs, |a, b| Ok(a + b))
        }
        BinaryOp::Sub => numeric_op(lhs, rhs, |a, b| Ok(a - b)),
        BinaryOp::Mul => numeric_op(lhs, rhs, |a, b| Ok(a * b)),
        BinaryOp::Div => numeric_op(lhs, rhs, |a, b| {
            if b == 0.0 {
                Err(ExprError::Eval("division by zero".to_string()))
            } else {
                Ok(a / b)
            }
        }),
        BinaryOp::Mod => numeric_op(lhs, rhs, |a, b| {
            if b == 0.0 {
                Err(ExprError::Eval("division by zero".to_string()))
            } else {
                Ok(a % b)
            }
        }),
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, lhs, rhs),
        BinaryOp::And | BinaryOp::Or => {
            unreachable!("And/Or are short-circuited in eval_at before reaching eval_binary")
        }
    }
}

fn numeric_op(
    lhs: &Value,
    rhs: &Value,
    f: impl Fn(f64, f64) -> Result<f64, ExprError>,
) -> Result<Value, ExprError> {
    let a = lhs
        .as_f64()
        .ok_or_else(|| ExprError::type_error("number", lhs))?;
    let b = rhs
        .as_f64()
        .ok_or_else(|| ExprError::type_error("number", rhs))?;
    Ok(number(f(a, b)?))
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let a = lhs
                .as_f64()
                .ok_or_else(|| ExprError::type_error("number or string", lhs))?;
            let b = rhs
                .as_f64()
                .ok_or_else(|| ExprError::type_error("number or string", rhs))?;
            a.partial_cmp(&b)
                .ok_or_else(|| ExprError::Eval("values are not comparable".to_string()))?
        }
    };
    let outcome = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("compare called with non-comparison operator"),
    };
    Ok(Value::Bool(outcome))
}

/// Integral results stay JSON integers.
fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

fn access_property(value: &Value, name: &str) -> Value {
    match value {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn access_index(value: &Value, index: &Value) -> Result<Value, ExprError> {
    match (value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_u64()
                .ok_or_else(|| ExprError::Eval("array index must be non-negative".to_string()))?;
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        _ => Ok(Value::Null),
    }
}

/// JavaScript-style truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.bind("shared", json!({"request_id": "req-1", "count": 3}));
        ctx.bind("results", json!({"http": {"data": {"count": 3}}}));
        ctx.memoise_secret("API_KEY".to_string(), Some("sk-abc".to_string()));
        ctx
    }

    fn run(src: &str) -> Result<Value, ExprError> {
        eval(&parse(src).unwrap(), &ctx())
    }

    #[test]
    fn test_secret_concat() {
        assert_eq!(run("'Bearer ' + secrets.API_KEY").unwrap(), json!("Bearer sk-abc"));
    }

    #[test]
    fn test_property_navigation() {
        assert_eq!(run("results.http.data.count").unwrap(), json!(3));
        assert_eq!(run("shared.request_id").unwrap(), json!("req-1"));
    }

    #[test]
    fn test_missing_property_is_null() {
        assert_eq!(run("results.http.missing").unwrap(), Value::Null);
        assert_eq!(run("unbound_name").unwrap(), Value::Null);
    }

    #[test]
    fn test_missing_secret_errors() {
        assert!(matches!(
            run("secrets.NOPE").unwrap_err(),
            ExprError::UnresolvedSecret(_)
        ));
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(run("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(run("shared.count >= 3").unwrap(), json!(true));
        assert_eq!(run("10 / 4").unwrap(), json!(2.5));
        assert!(run("1 / 0").is_err());
    }

    #[test]
    fn test_ternary_and_logic() {
        assert_eq!(run("shared.count == 3 ? 'yes' : 'no'").unwrap(), json!("yes"));
        assert_eq!(run("!shared.missing && shared.count > 0").unwrap(), json!(true));
    }

    #[test]
    fn test_index_access() {
        let mut ctx = EvalContext::new();
        ctx.bind("items", json!(["a", "b"]));
        assert_eq!(eval(&parse("items[1]").unwrap(), &ctx).unwrap(), json!("b"));
        assert_eq!(eval(&parse("items[9]").unwrap(), &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_bare_secrets_identifier_rejected() {
        assert!(run("secrets").is_err());
    }
}
