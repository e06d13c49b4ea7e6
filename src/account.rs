//! # Account Service
//!
//! Account lifecycle and credential checks: bcrypt password hashing,
//! API-token issuance, and bearer-token validation. The token path
//! accepts either the account's long-lived API token or an HS256 JWT
//! minted by `login`.
//!
//! Authentication failures are deliberately uniform — "no such user" and
//! "wrong password" both surface as [`AccountError::InvalidCredentials`],
//! so the API cannot be used to probe for usernames.

use crate::model::Account;
use crate::storage::{StorageError, StorageProvider};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const TOKEN_ISSUER: &str = "flowrunner";

/// Errors from account operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("username already taken: {0}")]
    UsernameTaken(String),
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("password hashing failed")]
    Hashing,
    #[error("token error: {0}")]
    Token(String),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for AccountError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::AccountNotFound(id) => AccountError::NotFound(id),
            other => AccountError::Storage(other),
        }
    }
}

/// Claim set carried by login-issued JWTs.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id.
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
}

/// Account creation, authentication, and token validation.
pub struct AccountService {
    storage: Arc<dyn StorageProvider>,
    jwt_secret: Vec<u8>,
    token_expiration: Duration,
}

impl AccountService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        jwt_secret: impl Into<Vec<u8>>,
        token_expiration_hours: i64,
    ) -> Self {
        Self {
            storage,
            jwt_secret: jwt_secret.into(),
            token_expiration: Duration::hours(token_expiration_hours.max(1)),
        }
    }

    /// Create an account. Username collisions are a distinct error from
    /// lookup failure.
    pub async fn create(&self, username: &str, password: &str) -> Result<Account, AccountError> {
        if self
            .storage
            .accounts()
            .get_account_by_username(username)
            .await
            .is_ok()
        {
            return Err(AccountError::UsernameTaken(username.to_string()));
        }

        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|_| AccountError::Hashing)?;
        let now = Utc::now();
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            api_token: generate_api_token(),
            created_at: now,
            updated_at: now,
        };
        self.storage.accounts().save_account(&account).await?;
        info!(username, account_id = %account.id, "account created");
        Ok(account)
    }

    /// Verify a username/password pair. bcrypt's comparator is
    /// constant-time over the hash.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Account, AccountError> {
        let account = self
            .storage
            .accounts()
            .get_account_by_username(username)
            .await
            .map_err(|_| AccountError::InvalidCredentials)?;

        let valid = bcrypt::verify(password, &account.password_hash)
            .map_err(|_| AccountError::InvalidCredentials)?;
        if !valid {
            return Err(AccountError::InvalidCredentials);
        }
        Ok(account)
    }

    /// Authenticate and mint a session JWT.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Account, String), AccountError> {
        let account = self.authenticate(username, password).await?;
        let token = self.issue_jwt(&account)?;
        Ok((account, token))
    }

    /// Validate a bearer token: the account's API token, or a JWT signed
    /// with the service secret.
    pub async fn validate_token(&self, token: &str) -> Result<Account, AccountError> {
        if let Ok(account) = self.storage.accounts().get_account_by_token(token).await {
            return Ok(account);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        let claims = jsonwebtoken::decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(&self.jwt_secret),
            &validation,
        )
        .map_err(|_| AccountError::InvalidCredentials)?
        .claims;

        Ok(self.storage.accounts().get_account(&claims.sub).await?)
    }

    fn issue_jwt(&self, account: &Account) -> Result<String, AccountError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: account.id.clone(),
            username: account.username.clone(),
            iat: now.timestamp(),
            exp: (now + self.token_expiration).timestamp(),
            nbf: now.timestamp(),
            iss: TOKEN_ISSUER.to_string(),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.jwt_secret),
        )
        .map_err(|e| AccountError::Token(e.to_string()))
    }

    pub async fn get(&self, account_id: &str) -> Result<Account, AccountError> {
        Ok(self.storage.accounts().get_account(account_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Account>, AccountError> {
        Ok(self.storage.accounts().list_accounts().await?)
    }

    /// Delete an account. Cascading cleanup of flows and secrets is the
    /// caller's responsibility.
    pub async fn delete(&self, account_id: &str) -> Result<(), AccountError> {
        Ok(self.storage.accounts().delete_account(account_id).await?)
    }
}

/// Hex of 32 cryptographically random bytes.
fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn service() -> AccountService {
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
        AccountService::new(storage, b"test-jwt-secret".to_vec(), 24)
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let service = service();
        let created = service.create("alice", "hunter2").await.unwrap();
        assert_eq!(created.api_token.len(), 64);

        let authed = service.authenticate("alice", "hunter2").await.unwrap();
        assert_eq!(authed.id, created.id);
    }

    #[tokio::test]
    async fn test_bad_password_and_missing_user_are_indistinguishable() {
        let service = service();
        service.create("alice", "hunter2").await.unwrap();

        let wrong_password = service.authenticate("alice", "nope").await.unwrap_err();
        let missing_user = service.authenticate("nobody", "nope").await.unwrap_err();

        assert!(matches!(wrong_password, AccountError::InvalidCredentials));
        assert!(matches!(missing_user, AccountError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let service = service();
        service.create("alice", "one").await.unwrap();
        let err = service.create("alice", "two").await.unwrap_err();
        assert!(matches!(err, AccountError::UsernameTaken(_)));
    }

    #[tokio::test]
    async fn test_api_token_validates() {
        let service = service();
        let account = service.create("alice", "pw").await.unwrap();
        let validated = service.validate_token(&account.api_token).await.unwrap();
        assert_eq!(validated.id, account.id);
    }

    #[tokio::test]
    async fn test_jwt_round_trip() {
        let service = service();
        let account = service.create("alice", "pw").await.unwrap();
        let (_, token) = service.login("alice", "pw").await.unwrap();

        let validated = service.validate_token(&token).await.unwrap();
        assert_eq!(validated.id, account.id);
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let service = service();
        service.create("alice", "pw").await.unwrap();
        let err = service.validate_token("not-a-token").await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_jwt_from_other_secret_rejected() {
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
        let service_a = AccountService::new(storage.clone(), b"secret-a".to_vec(), 24);
        let service_b = AccountService::new(storage, b"secret-b".to_vec(), 24);

        service_a.create("alice", "pw").await.unwrap();
        let (_, token) = service_a.login("alice", "pw").await.unwrap();

        assert!(service_b.validate_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_account() {
        let service = service();
        let account = service.create("alice", "pw").await.unwrap();
        service.delete(&account.id).await.unwrap();
        assert!(matches!(
            service.get(&account.id).await.unwrap_err(),
            AccountError::NotFound(_)
        ));
    }
}
