//! # Secret Vault
//!
//! Authenticated encryption of per-account key–value secrets. The vault
//! stores no plaintext: every write goes through AES-256-GCM
//! ([`cipher::SecretCipher`]) and every read decrypts on the way out.
//! Accounts are isolated by construction — the (account id, key)
//! composite identity scopes every operation.
//!
//! Beyond the simple string secrets, the structured extension wraps the
//! ciphertext in a JSON envelope carrying typed metadata and an optional
//! schema; see [`structured`].

pub mod cipher;
pub mod structured;

use crate::expr::{ExprError, SecretSource};
use crate::model::SecretRecord;
use crate::storage::{StorageError, StorageProvider};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use cipher::{CryptoError, SecretCipher};
use serde_json::Value;
use std::sync::Arc;
use structured::{
    SecretEnvelope, SecretMetadata, SecretQuery, SecretType, check_required_fields, oauth_schema,
};
use tracing::{debug, warn};

/// Errors from vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("secret value does not satisfy its schema; missing: {}", .0.join(", "))]
    SchemaViolation(Vec<String>),
    #[error("secret value is not JSON: {0}")]
    NotJson(String),
    #[error("no value at field path: {0}")]
    FieldNotFound(String),
    #[error("envelope serialization failed: {0}")]
    Envelope(String),
}

/// AEAD-encrypted secret storage with key-rotation support.
///
/// The active cipher sits behind an [`ArcSwap`]: rotation swaps the key
/// reference atomically, and concurrent readers finish with whichever
/// cipher they loaded, matching whichever ciphertext they read.
pub struct SecretVault {
    storage: Arc<dyn StorageProvider>,
    cipher: ArcSwap<SecretCipher>,
}

impl SecretVault {
    pub fn new(storage: Arc<dyn StorageProvider>, cipher: SecretCipher) -> Self {
        Self {
            storage,
            cipher: ArcSwap::from_pointee(cipher),
        }
    }

    /// Build from a hex-encoded 32-byte key, the configuration form.
    pub fn from_hex_key(
        storage: Arc<dyn StorageProvider>,
        hex_key: &str,
    ) -> Result<Self, VaultError> {
        Ok(Self::new(storage, SecretCipher::from_hex(hex_key)?))
    }

    fn active_cipher(&self) -> Arc<SecretCipher> {
        self.cipher.load_full()
    }

    // ------------------------------------------------------------------
    // Simple secrets
    // ------------------------------------------------------------------

    /// Encrypt and store a value. Updating an existing key keeps its
    /// original creation time.
    pub async fn set(&self, account_id: &str, key: &str, value: &str) -> Result<(), VaultError> {
        let ciphertext = self.active_cipher().encrypt(value.as_bytes())?;
        let now = Utc::now();
        self.storage
            .secrets()
            .save_secret(&SecretRecord {
                account_id: account_id.to_string(),
                key: key.to_string(),
                value: ciphertext,
                created_at: now,
                updated_at: now,
            })
            .await?;
        debug!(account_id, key, "secret stored");
        Ok(())
    }

    /// Decrypt and return a secret's plaintext. Reads an envelope's inner
    /// value transparently, so simple reads keep working after a secret
    /// is upgraded to the structured form.
    pub async fn get(&self, account_id: &str, key: &str) -> Result<String, VaultError> {
        let record = self.storage.secrets().get_secret(account_id, key).await?;
        let cipher = self.active_cipher();
        match SecretEnvelope::parse(&record.value) {
            Some(envelope) => Ok(cipher.decrypt_str(&envelope.value)?),
            None => Ok(cipher.decrypt_str(&record.value)?),
        }
    }

    pub async fn delete(&self, account_id: &str, key: &str) -> Result<(), VaultError> {
        self.storage.secrets().delete_secret(account_id, key).await?;
        Ok(())
    }

    /// Keys only, sorted.
    pub async fn list_keys(&self, account_id: &str) -> Result<Vec<String>, VaultError> {
        let records = self.storage.secrets().list_secrets(account_id).await?;
        Ok(records.into_iter().map(|r| r.key).collect())
    }

    /// Full records with the stored values blanked; for listings that
    /// must not expose ciphertext.
    pub async fn list_with_metadata(
        &self,
        account_id: &str,
    ) -> Result<Vec<SecretRecord>, VaultError> {
        let records = self.storage.secrets().list_secrets(account_id).await?;
        Ok(records.iter().map(SecretRecord::blanked).collect())
    }

    // ------------------------------------------------------------------
    // Key rotation
    // ------------------------------------------------------------------

    /// Re-encrypt every secret of the listed accounts from `old_key` to
    /// `new_key`, then make `new_key` the active key.
    ///
    /// Aborts at the first secret that fails to decrypt or save; secrets
    /// already re-encrypted are not rolled back, so a failed rotation
    /// leaves the listed accounts split across both keys. Re-running the
    /// rotation after fixing the cause is the recovery path.
    pub async fn rotate(
        &self,
        account_ids: &[String],
        old_key: &[u8],
        new_key: &[u8],
    ) -> Result<usize, VaultError> {
        let old_cipher = SecretCipher::new(old_key)?;
        let new_cipher = SecretCipher::new(new_key)?;
        let mut rotated = 0usize;

        for account_id in account_ids {
            let records = self.storage.secrets().list_secrets(account_id).await?;
            for record in records {
                let reencrypted = match SecretEnvelope::parse(&record.value) {
                    Some(mut envelope) => {
                        let plaintext = old_cipher.decrypt(&envelope.value)?;
                        envelope.value = new_cipher.encrypt(&plaintext)?;
                        envelope
                            .to_stored()
                            .map_err(|e| VaultError::Envelope(e.to_string()))?
                    }
                    None => {
                        let plaintext = old_cipher.decrypt(&record.value)?;
                        new_cipher.encrypt(&plaintext)?
                    }
                };
                self.storage
                    .secrets()
                    .save_secret(&SecretRecord {
                        value: reencrypted,
                        ..record
                    })
                    .await?;
                rotated += 1;
            }
        }

        self.cipher.store(Arc::new(new_cipher));
        debug!(rotated, "encryption key rotated");
        Ok(rotated)
    }

    // ------------------------------------------------------------------
    // Structured secrets
    // ------------------------------------------------------------------

    /// Store a structured secret. When a schema with a `required` list is
    /// supplied, the plaintext must parse as JSON containing every
    /// required field.
    pub async fn set_structured(
        &self,
        account_id: &str,
        key: &str,
        value: &str,
        metadata: SecretMetadata,
        schema: Option<Value>,
    ) -> Result<(), VaultError> {
        if let Some(schema) = &schema {
            let parsed: Value =
                serde_json::from_str(value).map_err(|e| VaultError::NotJson(e.to_string()))?;
            check_required_fields(schema, &parsed).map_err(VaultError::SchemaViolation)?;
        }

        let envelope = SecretEnvelope {
            value: self.active_cipher().encrypt(value.as_bytes())?,
            metadata,
            schema,
        };
        let now = Utc::now();
        self.storage
            .secrets()
            .save_secret(&SecretRecord {
                account_id: account_id.to_string(),
                key: key.to_string(),
                value: envelope
                    .to_stored()
                    .map_err(|e| VaultError::Envelope(e.to_string()))?,
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(())
    }

    /// Decrypt a structured secret: plaintext, metadata, and schema.
    /// A stored value that is not an envelope decrypts as a simple secret
    /// with default metadata. Touches `last_used` best-effort.
    pub async fn get_structured(
        &self,
        account_id: &str,
        key: &str,
    ) -> Result<(String, SecretMetadata, Option<Value>), VaultError> {
        let record = self.storage.secrets().get_secret(account_id, key).await?;
        let cipher = self.active_cipher();

        match SecretEnvelope::parse(&record.value) {
            Some(envelope) => {
                let plaintext = cipher.decrypt_str(&envelope.value)?;
                self.mark_used(&record, envelope.clone()).await;
                Ok((plaintext, envelope.metadata, envelope.schema))
            }
            None => {
                let plaintext = cipher.decrypt_str(&record.value)?;
                Ok((plaintext, SecretMetadata::default(), None))
            }
        }
    }

    /// Best-effort `last_used` update; a failure here must not fail the
    /// read that triggered it.
    async fn mark_used(&self, record: &SecretRecord, mut envelope: SecretEnvelope) {
        envelope.metadata.last_used = Some(Utc::now());
        let Ok(stored) = envelope.to_stored() else {
            return;
        };
        let result = self
            .storage
            .secrets()
            .save_secret(&SecretRecord {
                value: stored,
                ..record.clone()
            })
            .await;
        if let Err(error) = result {
            warn!(key = %record.key, %error, "failed to update last_used");
        }
    }

    /// Store an OAuth credential set under the canonical OAuth schema.
    pub async fn set_oauth(
        &self,
        account_id: &str,
        key: &str,
        credentials: &Value,
        description: impl Into<String>,
    ) -> Result<(), VaultError> {
        let metadata = SecretMetadata {
            secret_type: SecretType::Oauth,
            description: description.into(),
            ..SecretMetadata::default()
        };
        let value = serde_json::to_string(credentials)
            .map_err(|e| VaultError::Envelope(e.to_string()))?;
        self.set_structured(account_id, key, &value, metadata, Some(oauth_schema()))
            .await
    }

    /// Parse a secret's decrypted value as JSON and navigate a dotted
    /// path. An intermediate non-object value is an error.
    pub async fn get_field(
        &self,
        account_id: &str,
        key: &str,
        path: &str,
    ) -> Result<Value, VaultError> {
        let (plaintext, _, _) = self.get_structured(account_id, key).await?;
        let parsed: Value =
            serde_json::from_str(&plaintext).map_err(|e| VaultError::NotJson(e.to_string()))?;

        let mut current = parsed;
        for segment in path.split('.') {
            let Value::Object(mut map) = current else {
                return Err(VaultError::FieldNotFound(path.to_string()));
            };
            current = map
                .remove(segment)
                .ok_or_else(|| VaultError::FieldNotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// Query structured secrets by metadata. Plain (non-envelope) secrets
    /// never match. Returns (key, metadata) pairs sorted by key.
    pub async fn query(
        &self,
        account_id: &str,
        query: &SecretQuery,
    ) -> Result<Vec<(String, SecretMetadata)>, VaultError> {
        let records = self.storage.secrets().list_secrets(account_id).await?;
        let matched: Vec<(String, SecretMetadata)> = records
            .into_iter()
            .filter_map(|record| {
                SecretEnvelope::parse(&record.value).map(|envelope| (record.key, envelope.metadata))
            })
            .filter(|(_, metadata)| query.matches(metadata))
            .collect();
        Ok(query.paginate(matched))
    }
}

#[async_trait]
impl SecretSource for SecretVault {
    async fn resolve(&self, account_id: &str, key: &str) -> Result<Option<String>, ExprError> {
        match self.get(account_id, key).await {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(VaultError::Storage(StorageError::SecretNotFound(_))) => Ok(None),
            Err(error) => Err(ExprError::SecretLookup(error.to_string())),
        }
    }
}
