//! Evaluation context: the bindings visible inside `${…}` spans.
//!
//! The context carries `results`, `shared`, and any extra caller bindings
//! as plain JSON, plus a lazy view over the account's secrets. Secrets are
//! never loaded eagerly: the template layer scans each evaluation pass for
//! the keys it references and fetches exactly those through a
//! [`SecretSource`], memoising them here for the duration of the pass.

use super::ExprError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// On-demand secret lookup, implemented by the vault.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Resolve a secret's plaintext for an account. `Ok(None)` means the
    /// secret does not exist; transport and crypto failures are errors.
    async fn resolve(&self, account_id: &str, key: &str) -> Result<Option<String>, ExprError>;
}

/// A secret source with no secrets, for contexts evaluated outside any
/// account (tests, offline transforms).
pub struct NoSecrets;

#[async_trait]
impl SecretSource for NoSecrets {
    async fn resolve(&self, _account_id: &str, _key: &str) -> Result<Option<String>, ExprError> {
        Ok(None)
    }
}

/// Bindings and memoised secrets for one evaluation pass.
#[derive(Default)]
pub struct EvalContext {
    bindings: Map<String, Value>,
    resolved_secrets: HashMap<String, String>,
    missing_secrets: HashSet<String>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name visible to expressions (`results`, `shared`,
    /// `accountID`, trigger fields, …).
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.bindings.insert(name.into(), value);
        self
    }

    /// Look up a bound name.
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Memoise a fetched secret for this pass.
    pub(crate) fn memoise_secret(&mut self, key: String, plaintext: Option<String>) {
        match plaintext {
            Some(value) => {
                self.resolved_secrets.insert(key, value);
            }
            None => {
                self.missing_secrets.insert(key);
            }
        }
    }

    /// Whether a secret key has been fetched (hit or recorded miss).
    pub(crate) fn secret_known(&self, key: &str) -> bool {
        self.resolved_secrets.contains_key(key) || self.missing_secrets.contains(key)
    }

    /// The memoised value of a secret. A recorded miss is the unresolved
    /// sentinel: it surfaces as an evaluation error.
    pub(crate) fn secret(&self, key: &str) -> Result<Value, ExprError> {
        if let Some(plaintext) = self.resolved_secrets.get(key) {
            return Ok(Value::String(plaintext.clone()));
        }
        Err(ExprError::UnresolvedSecret(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bindings() {
        let mut ctx = EvalContext::new();
        ctx.bind("shared", json!({"request_id": "req-1"}));
        assert_eq!(ctx.binding("shared"), Some(&json!({"request_id": "req-1"})));
        assert_eq!(ctx.binding("absent"), None);
    }

    #[test]
    fn test_secret_memoisation_and_sentinel() {
        let mut ctx = EvalContext::new();
        ctx.memoise_secret("API_KEY".to_string(), Some("sk-abc".to_string()));
        ctx.memoise_secret("GONE".to_string(), None);

        assert!(ctx.secret_known("API_KEY"));
        assert!(ctx.secret_known("GONE"));
        assert!(!ctx.secret_known("NEVER_FETCHED"));

        assert_eq!(ctx.secret("API_KEY").unwrap(), json!("sk-abc"));
        assert!(matches!(
            ctx.secret("GONE").unwrap_err(),
            ExprError::UnresolvedSecret(_)
        ));
    }
}
