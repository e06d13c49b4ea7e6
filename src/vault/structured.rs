//! Structured secrets: typed metadata and optional schema around an
//! encrypted payload.
//!
//! At rest a structured secret is the JSON envelope
//! `{ "value": <hex-ciphertext>, "metadata": {...}, "schema": {...} }`.
//! A stored string that does not parse as an envelope is treated as a
//! plain hex ciphertext, which keeps simple secrets readable through the
//! structured paths.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category tag carried by structured-secret metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretType {
    #[default]
    General,
    Oauth,
    ApiKey,
    Database,
    Jwt,
    Custom,
}

/// Metadata stored alongside the encrypted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretMetadata {
    #[serde(rename = "type")]
    pub secret_type: SecretType,
    pub version: u32,
    pub description: String,
    pub tags: Vec<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub custom: Map<String, Value>,
}

impl Default for SecretMetadata {
    fn default() -> Self {
        Self {
            secret_type: SecretType::General,
            version: 1,
            description: String::new(),
            tags: Vec::new(),
            last_used: None,
            expires_at: None,
            custom: Map::new(),
        }
    }
}

/// The at-rest JSON wrapper for a structured secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEnvelope {
    /// Hex `nonce ‖ ciphertext ‖ tag`.
    pub value: String,
    pub metadata: SecretMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl SecretEnvelope {
    /// Parse a stored string as an envelope. `None` means the string is a
    /// plain hex ciphertext (the simple-secret form).
    pub fn parse(stored: &str) -> Option<Self> {
        serde_json::from_str(stored).ok()
    }

    pub fn to_stored(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The schema stored with OAuth secrets created through the typed helper.
pub fn oauth_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["client_id", "client_secret"],
        "properties": {
            "client_id": {"type": "string"},
            "client_secret": {"type": "string"},
            "access_token": {"type": "string"},
            "refresh_token": {"type": "string"},
            "token_url": {"type": "string"},
            "scopes": {"type": "array"}
        }
    })
}

/// Check a candidate value against an envelope schema. Only the
/// `required` field list is enforced for now.
// TODO: enforce per-property `type` constraints once a node type consumes
// them (the loader work is tracked alongside the database node plugin).
pub fn check_required_fields(schema: &Value, value: &Value) -> Result<(), Vec<String>> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    let object = value.as_object();
    let missing: Vec<String> = required
        .iter()
        .filter_map(Value::as_str)
        .filter(|field| object.map_or(true, |map| !map.contains_key(*field)))
        .map(String::from)
        .collect();
    if missing.is_empty() { Ok(()) } else { Err(missing) }
}

/// Filters for structured-secret queries. All populated filters must
/// match; tag matching is AND over the requested set (unlike flow search,
/// which is OR-any).
#[derive(Debug, Clone, Default)]
pub struct SecretQuery {
    pub secret_type: Option<SecretType>,
    pub tags_all: Vec<String>,
    pub description_contains: Option<String>,
    /// Matches secrets whose `expires_at` falls within this window from
    /// now.
    pub expires_within: Option<Duration>,
    /// Matches secrets not used since this instant (or never used).
    pub last_used_before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl SecretQuery {
    pub fn matches(&self, metadata: &SecretMetadata) -> bool {
        if let Some(secret_type) = self.secret_type {
            if metadata.secret_type != secret_type {
                return false;
            }
        }
        if !self.tags_all.is_empty()
            && !self.tags_all.iter().all(|t| metadata.tags.contains(t))
        {
            return false;
        }
        if let Some(needle) = &self.description_contains {
            if !metadata
                .description
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(window) = self.expires_within {
            let now = Utc::now();
            match metadata.expires_at {
                Some(expires_at) if expires_at >= now && expires_at <= now + window => {}
                _ => return false,
            }
        }
        if let Some(threshold) = self.last_used_before {
            if let Some(last_used) = metadata.last_used {
                if last_used >= threshold {
                    return false;
                }
            }
        }
        true
    }

    /// Apply offset/limit to an already-filtered listing.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        if self.limit > 0 {
            iter.take(self.limit).collect()
        } else {
            iter.collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = SecretEnvelope {
            value: "deadbeef".to_string(),
            metadata: SecretMetadata {
                secret_type: SecretType::Oauth,
                tags: vec!["prod".to_string()],
                ..SecretMetadata::default()
            },
            schema: Some(oauth_schema()),
        };
        let stored = envelope.to_stored().unwrap();
        let parsed = SecretEnvelope::parse(&stored).unwrap();
        assert_eq!(parsed.value, "deadbeef");
        assert_eq!(parsed.metadata.secret_type, SecretType::Oauth);
        assert_eq!(parsed.metadata.version, 1);
        assert_eq!(parsed.schema, Some(oauth_schema()));
    }

    #[test]
    fn test_plain_ciphertext_is_not_an_envelope() {
        assert!(SecretEnvelope::parse("a1b2c3").is_none());
        assert!(SecretEnvelope::parse("{\"unrelated\": true}").is_none());
    }

    #[test]
    fn test_secret_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&SecretType::ApiKey).unwrap(),
            "\"api-key\""
        );
        assert_eq!(
            serde_json::from_str::<SecretType>("\"oauth\"").unwrap(),
            SecretType::Oauth
        );
    }

    #[test]
    fn test_check_required_fields() {
        let schema = oauth_schema();
        let complete = json!({"client_id": "id", "client_secret": "s"});
        assert!(check_required_fields(&schema, &complete).is_ok());

        let partial = json!({"client_id": "id"});
        let missing = check_required_fields(&schema, &partial).unwrap_err();
        assert_eq!(missing, vec!["client_secret".to_string()]);

        let not_object = json!("scalar");
        assert!(check_required_fields(&schema, &not_object).is_err());
    }

    #[test]
    fn test_query_tags_are_and() {
        let metadata = SecretMetadata {
            tags: vec!["prod".to_string(), "db".to_string()],
            ..SecretMetadata::default()
        };

        let mut query = SecretQuery {
            tags_all: vec!["prod".to_string(), "db".to_string()],
            ..SecretQuery::default()
        };
        assert!(query.matches(&metadata));

        query.tags_all.push("extra".to_string());
        assert!(!query.matches(&metadata));
    }

    #[test]
    fn test_query_expiry_window() {
        let soon = SecretMetadata {
            expires_at: Some(Utc::now() + Duration::hours(1)),
            ..SecretMetadata::default()
        };
        let later = SecretMetadata {
            expires_at: Some(Utc::now() + Duration::days(30)),
            ..SecretMetadata::default()
        };

        let query = SecretQuery {
            expires_within: Some(Duration::days(1)),
            ..SecretQuery::default()
        };
        assert!(query.matches(&soon));
        assert!(!query.matches(&later));
    }

    #[test]
    fn test_query_last_used_threshold_matches_never_used() {
        let never_used = SecretMetadata::default();
        let query = SecretQuery {
            last_used_before: Some(Utc::now()),
            ..SecretQuery::default()
        };
        assert!(query.matches(&never_used));
    }
}
