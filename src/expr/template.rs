//! Template scanning and resolution.
//!
//! A value is a template iff it is a string containing at least one
//! `${…}` span. A template that is exactly one span evaluates to the
//! span's raw result (any JSON type); otherwise each span is stringified
//! and spliced into the surrounding literal text.
//!
//! Spans that fail to parse fall back to plain textual substitution of
//! `${identifier.path.segments}`, so basic parameter passing keeps working
//! even when a span is not a valid expression.

use super::context::EvalContext;
use super::eval::{SECRETS_BINDING, eval};
use super::parser::{Expr, parse};
use super::{ExprError, stringify};
use serde_json::Value;
use std::collections::BTreeSet;

/// One piece of a scanned template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text outside any span.
    Literal(String),
    /// The body of a `${…}` span, braces stripped.
    Span(String),
}

/// Whether a string contains at least one expression span.
pub fn is_template(input: &str) -> bool {
    input.contains("${")
}

/// Split a string into literal text and span bodies. An unterminated
/// `${` is kept as literal text rather than failing the whole template.
pub fn split_template(input: &str) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            if let Some(end) = find_span_end(&chars, i + 2) {
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                let body: String = chars[i + 2..end].iter().collect();
                parts.push(TemplatePart::Span(body));
                i = end + 1;
                continue;
            }
        }
        literal.push(chars[i]);
        i += 1;
    }

    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    parts
}

/// Scan forward for the span's closing `}`, skipping braces inside string
/// literals.
fn find_span_end(chars: &[char], mut i: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == '\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '}' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Collect the secret keys a template can reference, so the caller can
/// prefetch them before the synchronous evaluation pass. Keys accessed
/// through computed index expressions cannot be known ahead of time and
/// surface as unresolved at evaluation.
pub fn collect_secret_refs(input: &str, refs: &mut BTreeSet<String>) {
    for part in split_template(input) {
        let TemplatePart::Span(body) = part else {
            continue;
        };
        match parse(&body) {
            Ok(expr) => collect_from_expr(&expr, refs),
            Err(_) => {
                // The fallback path only understands dotted identifiers.
                let mut segments = body.trim().split('.');
                if segments.next() == Some(SECRETS_BINDING) {
                    if let Some(key) = segments.next() {
                        if segments.next().is_none() && is_identifier(key) {
                            refs.insert(key.to_string());
                        }
                    }
                }
            }
        }
    }
}

fn collect_from_expr(expr: &Expr, refs: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) | Expr::Ident(_) => {}
        Expr::Property { object, name } => {
            if matches!(object.as_ref(), Expr::Ident(base) if base == SECRETS_BINDING) {
                refs.insert(name.clone());
            }
            collect_from_expr(object, refs);
        }
        Expr::Index { object, index } => {
            if matches!(object.as_ref(), Expr::Ident(base) if base == SECRETS_BINDING) {
                if let Expr::Literal(Value::String(key)) = index.as_ref() {
                    refs.insert(key.clone());
                }
            }
            collect_from_expr(object, refs);
            collect_from_expr(index, refs);
        }
        Expr::Unary { operand, .. } => collect_from_expr(operand, refs),
        Expr::Binary { left, right, .. } => {
            collect_from_expr(left, refs);
            collect_from_expr(right, refs);
        }
        Expr::Ternary {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_from_expr(condition, refs);
            collect_from_expr(then_branch, refs);
            collect_from_expr(else_branch, refs);
        }
    }
}

/// Collect secret references from every templated string in a JSON tree.
pub fn collect_secret_refs_deep(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::String(s) if is_template(s) => collect_secret_refs(s, refs),
        Value::Array(items) => {
            for item in items {
                collect_secret_refs_deep(item, refs);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_secret_refs_deep(item, refs);
            }
        }
        _ => {}
    }
}

/// Resolve one string against an already-prefetched context.
pub fn resolve_str(input: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
    let parts = split_template(input);

    // Exactly `${…}`: return the raw evaluated value.
    if let [TemplatePart::Span(body)] = parts.as_slice() {
        return eval_span(body, ctx);
    }

    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(&text),
            TemplatePart::Span(body) => out.push_str(&stringify(&eval_span(&body, ctx)?)),
        }
    }
    Ok(Value::String(out))
}

fn eval_span(body: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
    match parse(body) {
        Ok(expr) => eval(&expr, ctx),
        Err(parse_err) => fallback_substitute(body, ctx).map_err(|_| parse_err),
    }
}

/// Textual-substitution fallback: `${identifier.path.segments}` resolved
/// by walking the bindings, no expression semantics.
fn fallback_substitute(body: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
    let path: Vec<&str> = body.trim().split('.').collect();
    if path.is_empty() || !path.iter().all(|seg| is_identifier(seg)) {
        return Err(ExprError::Parse(format!("not a simple path: {body}")));
    }

    if path[0] == SECRETS_BINDING {
        let [_, key] = path.as_slice() else {
            return Err(ExprError::Parse(format!("not a secret path: {body}")));
        };
        return ctx.secret(key);
    }

    let mut current = ctx.binding(path[0]).cloned().unwrap_or(Value::Null);
    for segment in &path[1..] {
        current = match current {
            Value::Object(mut map) => map.remove(*segment).unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    Ok(current)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Produce a structurally identical JSON tree with every templated string
/// resolved. Map keys are left unchanged; non-string leaves pass through.
pub fn resolve_value(value: &Value, ctx: &EvalContext) -> Result<Value, ExprError> {
    match value {
        Value::String(s) if is_template(s) => resolve_str(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.bind("shared", json!({"request_id": "req-1"}));
        ctx.bind("results", json!({"http": {"data": {"count": 3}}}));
        ctx.memoise_secret("API_KEY".to_string(), Some("sk-abc".to_string()));
        ctx
    }

    #[test]
    fn test_split_template() {
        let parts = split_template("req ${shared.request_id}: done");
        assert_eq!(
            parts,
            vec![
                TemplatePart::Literal("req ".to_string()),
                TemplatePart::Span("shared.request_id".to_string()),
                TemplatePart::Literal(": done".to_string()),
            ]
        );
    }

    #[test]
    fn test_split_skips_braces_in_strings() {
        let parts = split_template("${'a}b' + 'c'}");
        assert_eq!(parts, vec![TemplatePart::Span("'a}b' + 'c'".to_string())]);
    }

    #[test]
    fn test_unterminated_span_is_literal() {
        let parts = split_template("hello ${oops");
        assert_eq!(parts, vec![TemplatePart::Literal("hello ${oops".to_string())]);
    }

    #[test]
    fn test_single_span_returns_raw_value() {
        let value = resolve_str("${results.http.data.count}", &ctx()).unwrap();
        assert_eq!(value, json!(3));
    }

    #[test]
    fn test_mixed_template_splices_strings() {
        let value = resolve_str(
            "req ${shared.request_id}: ${results.http.data.count} users",
            &ctx(),
        )
        .unwrap();
        assert_eq!(value, json!("req req-1: 3 users"));
    }

    #[test]
    fn test_bearer_concat() {
        let value = resolve_str("${'Bearer ' + secrets.API_KEY}", &ctx()).unwrap();
        assert_eq!(value, json!("Bearer sk-abc"));
    }

    #[test]
    fn test_collect_secret_refs() {
        let mut refs = BTreeSet::new();
        collect_secret_refs("${'Bearer ' + secrets.API_KEY} ${secrets['OTHER']}", &mut refs);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["API_KEY".to_string(), "OTHER".to_string()]
        );
    }

    #[test]
    fn test_resolve_value_walks_structure() {
        let input = json!({
            "headers": {"Authorization": "${'Bearer ' + secrets.API_KEY}"},
            "ids": ["${shared.request_id}", "literal"],
            "count": 3
        });
        let resolved = resolve_value(&input, &ctx()).unwrap();
        assert_eq!(
            resolved,
            json!({
                "headers": {"Authorization": "Bearer sk-abc"},
                "ids": ["req-1", "literal"],
                "count": 3
            })
        );
    }

    #[test]
    fn test_fallback_path_substitution() {
        // `true` is a keyword, so the span fails to parse as an
        // expression; the dotted-path fallback still resolves it.
        assert!(parse("shared.true").is_err());
        let mut ctx = EvalContext::new();
        ctx.bind("shared", json!({"true": "yes", "request_id": "req-1"}));

        let value = resolve_str("${shared.true}", &ctx).unwrap();
        assert_eq!(value, json!("yes"));

        // Whitespace inside a simple span is tolerated either way.
        let value = resolve_str("${ shared.request_id }", &ctx).unwrap();
        assert_eq!(value, json!("req-1"));
    }

    #[test]
    fn test_non_template_passthrough() {
        let value = resolve_value(&json!("plain text"), &ctx()).unwrap();
        assert_eq!(value, json!("plain text"));
    }
}
