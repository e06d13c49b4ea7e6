//! # Service Configuration
//!
//! Configuration loads from a YAML file, then environment variables
//! override individual fields (`FLOWRUNNER_*`). `auth.jwt_secret` and
//! `auth.encryption_key` are generated and written back on first run;
//! starting without them (and without a writable config path to persist
//! fresh ones) is a fatal error, since silently regenerating keys would
//! strand every stored secret.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("storage backend '{0}' is not compiled into this build")]
    BackendUnavailable(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Which persistence backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Postgres,
    Dynamodb,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub postgres: PostgresConfig,
    pub dynamodb: DynamodbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/flowrunner".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamodbConfig {
    /// Table name prefix; tables are `<prefix>_flows`, `<prefix>_secrets`…
    pub table_prefix: String,
    /// Optional endpoint override for local DynamoDB.
    pub endpoint: Option<String>,
}

impl Default for DynamodbConfig {
    fn default() -> Self {
        Self {
            table_prefix: "flowrunner".to_string(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Hex of 32 bytes; the vault's AES-256-GCM key.
    pub encryption_key: String,
    pub token_expiration_hours: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Endpoint to POST events to; webhooks are disabled when empty.
    pub endpoint: String,
    pub secret: String,
    pub retry: crate::webhook::RetryConfig,
}

impl Config {
    /// Load from a YAML file, apply environment overrides, and ensure
    /// auth keys exist — generating and persisting them on first run.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        if config.auth.token_expiration_hours <= 0 {
            config.auth.token_expiration_hours = 24;
        }

        let generated = config.ensure_auth_keys()?;
        if generated {
            // First run: persist the generated keys so restarts keep
            // decrypting existing data.
            config.write(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let rendered = serde_yaml::to_string(self)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FLOWRUNNER_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("FLOWRUNNER_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(kind) = std::env::var("FLOWRUNNER_STORAGE_TYPE") {
            match kind.to_lowercase().as_str() {
                "memory" => self.storage.kind = StorageKind::Memory,
                "postgres" => self.storage.kind = StorageKind::Postgres,
                "dynamodb" => self.storage.kind = StorageKind::Dynamodb,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("FLOWRUNNER_POSTGRES_URL") {
            self.storage.postgres.url = url;
        }
        if let Ok(secret) = std::env::var("FLOWRUNNER_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(key) = std::env::var("FLOWRUNNER_ENCRYPTION_KEY") {
            self.auth.encryption_key = key;
        }
    }

    /// Generate missing auth keys. Returns whether anything was
    /// generated.
    fn ensure_auth_keys(&mut self) -> Result<bool, ConfigError> {
        let mut generated = false;
        if self.auth.jwt_secret.is_empty() {
            self.auth.jwt_secret = random_hex(32);
            generated = true;
        }
        if self.auth.encryption_key.is_empty() {
            self.auth.encryption_key = random_hex(32);
            generated = true;
        }
        Ok(generated)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let key = hex::decode(&self.auth.encryption_key).map_err(|_| ConfigError::Invalid {
            field: "auth.encryption_key".to_string(),
            reason: "must be hex".to_string(),
        })?;
        if key.len() != 32 {
            return Err(ConfigError::Invalid {
                field: "auth.encryption_key".to_string(),
                reason: "must decode to exactly 32 bytes".to_string(),
            });
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid {
                field: "auth.jwt_secret".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buffer);
    hex::encode(buffer)
}
