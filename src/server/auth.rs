//! Request authentication.
//!
//! Credentials arrive as `Authorization: Bearer <token>` — an account
//! API token or a login-issued JWT — or as HTTP basic auth. The
//! extractor resolves them to the owning [`Account`]; handlers then
//! enforce resource ownership themselves.

use super::{ApiError, AppState};
use crate::model::Account;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// The authenticated account behind the current request.
pub struct AuthAccount(pub Account);

impl AuthAccount {
    /// Ownership check for `{acct}`-scoped paths.
    pub fn ensure_owns(&self, account_id: &str) -> Result<(), ApiError> {
        if self.0.id == account_id {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(ApiError::unauthorized)?;

        if let Some(token) = header.strip_prefix("Bearer ") {
            let account = state.accounts.validate_token(token.trim()).await?;
            return Ok(AuthAccount(account));
        }

        if let Some(encoded) = header.strip_prefix("Basic ") {
            let decoded = STANDARD
                .decode(encoded.trim())
                .map_err(|_| ApiError::unauthorized())?;
            let credentials =
                String::from_utf8(decoded).map_err(|_| ApiError::unauthorized())?;
            let (username, password) = credentials
                .split_once(':')
                .ok_or_else(ApiError::unauthorized)?;
            let account = state.accounts.authenticate(username, password).await?;
            return Ok(AuthAccount(account));
        }

        Err(ApiError::unauthorized())
    }
}
