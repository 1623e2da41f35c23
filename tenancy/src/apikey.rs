use atheneum_core::error::{AtheneumError, ErrorKind};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Visible tag on every raw key so leaked strings are easy to recognize.
pub const KEY_PREFIX: &str = "kb_";
const KEY_BYTES: usize = 32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Read,
    Write,
    Admin,
}

impl Scope {
    /// Scope implication: admin covers write covers read.
    pub fn grants(&self, required: Scope) -> bool {
        matches!(
            (self, required),
            (Scope::Admin, _)
                | (Scope::Write, Scope::Write)
                | (Scope::Write, Scope::Read)
                | (Scope::Read, Scope::Read)
        )
    }
}

/// Stored key record. The raw key exists only in the creation response; at
/// rest there is nothing but the SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: String,
    pub project_id: Uuid,
    pub name: String,
    pub scopes: BTreeSet<Scope>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub key_hash: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub api_key: ApiKey,
    pub raw_key: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("api key not found: {0}")]
    NotFound(String),
    #[error("api key rejected: {0}")]
    Unauthorized(String),
    #[error("api key must have at least one scope")]
    EmptyScopes,
}

impl AtheneumError for ApiKeyError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ApiKeyError::NotFound(_) => ErrorKind::NotFound,
            ApiKeyError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiKeyError::EmptyScopes => ErrorKind::InvalidArgument,
        }
    }
}

pub fn generate_raw_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

pub fn hash_raw_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn new_key_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    format!("key_{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Compares every byte regardless of where the first mismatch sits.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

/// The keys of one project. Revoked keys stay in the ring for audit; they
/// just never validate again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyRing {
    keys: Vec<ApiKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(keys: Vec<ApiKey>) -> Self {
        Self { keys }
    }

    /// Re-attaches a persisted record, e.g. during state restore.
    pub fn from_persisted(&mut self, key: ApiKey) {
        self.keys.push(key);
    }

    pub fn create(
        &mut self,
        project_id: Uuid,
        name: impl Into<String>,
        scopes: BTreeSet<Scope>,
        expires_days: Option<i64>,
    ) -> Result<GeneratedKey, ApiKeyError> {
        if scopes.is_empty() {
            return Err(ApiKeyError::EmptyScopes);
        }

        let raw_key = generate_raw_key();
        let now = Utc::now();
        let api_key = ApiKey {
            key_id: new_key_id(),
            project_id,
            name: name.into(),
            scopes,
            created_at: now,
            expires_at: expires_days.map(|days| now + Duration::days(days)),
            revoked: false,
            last_used_at: None,
            key_hash: hash_raw_key(&raw_key),
        };
        self.keys.push(api_key.clone());
        Ok(GeneratedKey { api_key, raw_key })
    }

    pub fn list(&self) -> Vec<ApiKey> {
        self.keys.clone()
    }

    pub fn revoke(&mut self, key_id: &str) -> Result<(), ApiKeyError> {
        let key = self
            .keys
            .iter_mut()
            .find(|key| key.key_id == key_id)
            .ok_or_else(|| ApiKeyError::NotFound(key_id.to_string()))?;
        key.revoked = true;
        Ok(())
    }

    /// Finds the key matching `raw` and checks revocation, expiry and scope.
    /// Returns the key id; the caller stamps `last_used_at` best-effort.
    pub fn validate(&self, raw: &str, required: Scope) -> Result<String, ApiKeyError> {
        let hash = hash_raw_key(raw);
        let now = Utc::now();

        for key in &self.keys {
            if !constant_time_eq(&key.key_hash, &hash) {
                continue;
            }
            if key.revoked {
                return Err(ApiKeyError::Unauthorized("key is revoked".to_string()));
            }
            if let Some(expires_at) = key.expires_at {
                if expires_at <= now {
                    return Err(ApiKeyError::Unauthorized("key is expired".to_string()));
                }
            }
            if !key.scopes.iter().any(|scope| scope.grants(required)) {
                return Err(ApiKeyError::Unauthorized(format!(
                    "key lacks {:?} scope",
                    required
                )));
            }
            return Ok(key.key_id.clone());
        }

        Err(ApiKeyError::Unauthorized("unknown key".to_string()))
    }

    pub fn touch(&mut self, key_id: &str) {
        if let Some(key) = self.keys.iter_mut().find(|key| key.key_id == key_id) {
            key.last_used_at = Some(Utc::now());
        }
    }

    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.keys
            .iter()
            .filter(|key| {
                !key.revoked && key.expires_at.map(|expiry| expiry > now).unwrap_or(true)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[Scope]) -> BTreeSet<Scope> {
        list.iter().copied().collect()
    }

    #[test]
    fn raw_keys_are_prefixed_and_unique() {
        let a = generate_raw_key();
        let b = generate_raw_key();
        assert!(a.starts_with(KEY_PREFIX));
        assert_ne!(a, b);
        // 32 bytes of URL-safe base64 without padding.
        assert_eq!(a.len(), KEY_PREFIX.len() + 43);
    }

    #[test]
    fn read_key_validates_read_but_not_write() {
        let mut ring = KeyRing::new();
        let generated = ring
            .create(Uuid::new_v4(), "reader", scopes(&[Scope::Read]), Some(90))
            .unwrap();

        assert!(ring.validate(&generated.raw_key, Scope::Read).is_ok());
        assert!(matches!(
            ring.validate(&generated.raw_key, Scope::Write),
            Err(ApiKeyError::Unauthorized(_))
        ));
        assert!(matches!(
            ring.validate(&generated.raw_key, Scope::Admin),
            Err(ApiKeyError::Unauthorized(_))
        ));
    }

    #[test]
    fn admin_key_grants_everything() {
        let mut ring = KeyRing::new();
        let generated = ring
            .create(Uuid::new_v4(), "root", scopes(&[Scope::Admin]), None)
            .unwrap();

        for required in [Scope::Read, Scope::Write, Scope::Admin] {
            assert!(ring.validate(&generated.raw_key, required).is_ok());
        }
    }

    #[test]
    fn revocation_is_immediate_and_key_stays_for_audit() {
        let mut ring = KeyRing::new();
        let generated = ring
            .create(Uuid::new_v4(), "temp", scopes(&[Scope::Read]), None)
            .unwrap();

        ring.revoke(&generated.api_key.key_id).unwrap();

        assert!(matches!(
            ring.validate(&generated.raw_key, Scope::Read),
            Err(ApiKeyError::Unauthorized(_))
        ));
        assert_eq!(ring.list().len(), 1);
        assert!(ring.list()[0].revoked);
        assert_eq!(ring.active_count(), 0);
    }

    #[test]
    fn expired_key_fails_validation() {
        let mut ring = KeyRing::new();
        let generated = ring
            .create(Uuid::new_v4(), "old", scopes(&[Scope::Read]), Some(-1))
            .unwrap();

        assert!(matches!(
            ring.validate(&generated.raw_key, Scope::Read),
            Err(ApiKeyError::Unauthorized(_))
        ));
    }

    #[test]
    fn unknown_key_is_unauthorized_not_not_found() {
        let ring = KeyRing::new();
        let result = ring.validate("kb_not-a-real-key", Scope::Read);
        assert!(matches!(result, Err(ApiKeyError::Unauthorized(_))));
    }

    #[test]
    fn stored_record_never_contains_the_raw_key() {
        let mut ring = KeyRing::new();
        let generated = ring
            .create(Uuid::new_v4(), "k", scopes(&[Scope::Read]), None)
            .unwrap();

        let listed = ring.list();
        let serialized = serde_json::to_string(&listed).unwrap();
        assert!(!serialized.contains(&generated.raw_key));
        assert_eq!(listed[0].key_hash, hash_raw_key(&generated.raw_key));
    }

    #[test]
    fn empty_scopes_are_rejected() {
        let mut ring = KeyRing::new();
        let result = ring.create(Uuid::new_v4(), "none", BTreeSet::new(), None);
        assert!(matches!(result, Err(ApiKeyError::EmptyScopes)));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
