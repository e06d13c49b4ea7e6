//! # Expression / Template Subsystem
//!
//! Node parameters and inline scripts may embed `${…}` expression spans.
//! Spans are written in a small JavaScript-flavoured dialect and evaluate
//! against a composite runtime context:
//!
//! - `secrets` — lazy, per-account vault lookups (`secrets.API_KEY`),
//!   memoised for the duration of one evaluation pass; a missing secret
//!   fails the evaluation.
//! - `results` — prior node results, keyed by node id.
//! - `shared` — the flow-level variable map.
//! - any extra bindings the caller supplies (`accountID`, trigger data…).
//!
//! The evaluator itself is synchronous. Laziness is preserved by scanning
//! each pass for the secret keys it references and fetching exactly those
//! through the [`SecretSource`] before evaluation; nothing else is ever
//! loaded from the vault.
//!
//! ## Resolution rules
//!
//! - A string that is exactly one span returns the span's raw value
//!   (any JSON type).
//! - A string mixing spans and literal text stringifies each span and
//!   splices it in place.
//! - [`Evaluator::resolve_params`] walks arbitrary JSON, resolving every
//!   templated string while leaving structure and map keys intact.
//! - A span that fails to parse falls back to plain textual substitution
//!   of `${identifier.path.segments}`.

mod context;
mod eval;
mod lexer;
mod parser;
mod template;

pub use context::{EvalContext, NoSecrets, SecretSource};
pub use eval::truthy;
pub use template::is_template;

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Errors from template parsing and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("expression parse error: {0}")]
    Parse(String),
    #[error("expression evaluation error: {0}")]
    Eval(String),
    #[error("unresolved secret: {0}")]
    UnresolvedSecret(String),
    #[error("type error: expected {expected}, found {found}")]
    Type { expected: String, found: String },
    #[error("secret lookup failed: {0}")]
    SecretLookup(String),
}

impl ExprError {
    pub(crate) fn type_error(expected: &str, found: &Value) -> Self {
        let found = match found {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        Self::Type {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Render a value for splicing into template text.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Resolves templates against a secret source and caller bindings.
pub struct Evaluator {
    secrets: Arc<dyn SecretSource>,
}

impl Evaluator {
    pub fn new(secrets: Arc<dyn SecretSource>) -> Self {
        Self { secrets }
    }

    /// An evaluator with no secret source; `secrets.*` references fail.
    pub fn without_secrets() -> Self {
        Self {
            secrets: Arc::new(NoSecrets),
        }
    }

    /// Resolve a single possibly-templated string.
    pub async fn resolve_template(
        &self,
        account_id: &str,
        input: &str,
        ctx: &mut EvalContext,
    ) -> Result<Value, ExprError> {
        let mut refs = BTreeSet::new();
        template::collect_secret_refs(input, &mut refs);
        self.prefetch(account_id, refs, ctx).await?;
        template::resolve_str(input, ctx)
    }

    /// Resolve every templated string inside an arbitrary JSON structure,
    /// preserving shape and map keys. This is the entry point the runtime
    /// uses for node parameter resolution.
    pub async fn resolve_params(
        &self,
        account_id: &str,
        params: &Value,
        ctx: &mut EvalContext,
    ) -> Result<Value, ExprError> {
        let mut refs = BTreeSet::new();
        template::collect_secret_refs_deep(params, &mut refs);
        self.prefetch(account_id, refs, ctx).await?;
        template::resolve_value(params, ctx)
    }

    async fn prefetch(
        &self,
        account_id: &str,
        refs: BTreeSet<String>,
        ctx: &mut EvalContext,
    ) -> Result<(), ExprError> {
        for key in refs {
            if ctx.secret_known(&key) {
                continue;
            }
            let plaintext = self.secrets.resolve(account_id, &key).await?;
            ctx.memoise_secret(key, plaintext);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl SecretSource for CountingSource {
        async fn resolve(
            &self,
            account_id: &str,
            key: &str,
        ) -> Result<Option<String>, ExprError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            assert_eq!(account_id, "acct-1");
            match key {
                "API_KEY" => Ok(Some("sk-abc".to_string())),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn test_parameter_templating_end_to_end() {
        let evaluator = Evaluator::new(Arc::new(CountingSource {
            lookups: AtomicUsize::new(0),
        }));

        let mut ctx = EvalContext::new();
        ctx.bind("shared", json!({"request_id": "req-1"}));
        ctx.bind("results", json!({"http": {"data": {"count": 3}}}));

        let params = json!({
            "Authorization": "${'Bearer ' + secrets.API_KEY}",
            "summary": "req ${shared.request_id}: ${results.http.data.count} users"
        });

        let resolved = evaluator
            .resolve_params("acct-1", &params, &mut ctx)
            .await
            .unwrap();

        assert_eq!(resolved["Authorization"], json!("Bearer sk-abc"));
        assert_eq!(resolved["summary"], json!("req req-1: 3 users"));
    }

    #[tokio::test]
    async fn test_secret_lookups_are_memoised_per_pass() {
        let source = Arc::new(CountingSource {
            lookups: AtomicUsize::new(0),
        });
        let evaluator = Evaluator::new(source.clone());

        let mut ctx = EvalContext::new();
        let params = json!({
            "a": "${secrets.API_KEY}",
            "b": "${secrets.API_KEY} again",
            "c": ["${secrets.API_KEY}"]
        });
        evaluator
            .resolve_params("acct-1", &params, &mut ctx)
            .await
            .unwrap();

        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_evaluation() {
        let evaluator = Evaluator::new(Arc::new(CountingSource {
            lookups: AtomicUsize::new(0),
        }));
        let mut ctx = EvalContext::new();
        let err = evaluator
            .resolve_template("acct-1", "${secrets.MISSING}", &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExprError::UnresolvedSecret(_)));
    }

    #[tokio::test]
    async fn test_non_template_values_pass_through() {
        let evaluator = Evaluator::without_secrets();
        let mut ctx = EvalContext::new();
        let params = json!({"n": 42, "s": "plain", "b": true});
        let resolved = evaluator
            .resolve_params("acct", &params, &mut ctx)
            .await
            .unwrap();
        assert_eq!(resolved, params);
    }
}
