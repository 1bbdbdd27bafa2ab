//! Connection gate: bearer-token validation and directory lookup.
//!
//! A connection presents an opaque bearer token once, at connect time. The
//! gate checks the signature and expiry, extracts the subject, and confirms
//! the subject still exists in the user directory (one lookup). Rejected
//! connections never see an event stream; retry policy belongs to the
//! client SDK, not here.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::AuthError;

/// The authenticated identity attached to a connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// One lookup: does this subject still exist, and what do we call them.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Option<Identity>;
}

/// Directory backed by the SQLite users table.
pub struct SqliteDirectory {
    db: Arc<Mutex<Db>>,
}

impl SqliteDirectory {
    pub fn new(db: Arc<Mutex<Db>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for SqliteDirectory {
    async fn lookup(&self, user_id: &str) -> Option<Identity> {
        let db = self.db.lock();
        match db.get_user(user_id) {
            Ok(row) => row.map(|user| Identity {
                user_id: user.id,
                username: user.username,
            }),
            Err(e) => {
                tracing::error!(%user_id, "directory lookup failed: {e}");
                None
            }
        }
    }
}

/// Directory that accepts any signed subject. Used when the gateway runs
/// without a local user table and the token issuer is fully trusted.
pub struct OpenDirectory;

#[async_trait]
impl UserDirectory for OpenDirectory {
    async fn lookup(&self, user_id: &str) -> Option<Identity> {
        if user_id.is_empty() {
            return None;
        }
        Some(Identity {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
        })
    }
}

/// In-memory directory for tests.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<std::collections::HashMap<String, String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, username: &str) {
        self.users
            .lock()
            .insert(user_id.to_string(), username.to_string());
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn lookup(&self, user_id: &str) -> Option<Identity> {
        self.users.lock().get(user_id).map(|username| Identity {
            user_id: user_id.to_string(),
            username: username.clone(),
        })
    }
}

/// Validates credentials and resolves identities at connect time.
pub struct Gate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    directory: Arc<dyn UserDirectory>,
}

impl Gate {
    pub fn new(secret: &str, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            directory,
        }
    }

    /// Validate a token and resolve its subject. `None` means no credential
    /// was presented at all.
    pub async fn admit(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Missing)?;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed(e.to_string()),
            })?;

        let subject = data.claims.sub;
        self.directory
            .lookup(&subject)
            .await
            .ok_or(AuthError::UnknownUser(subject))
    }

    /// Mint a token for `user_id`, valid for `ttl_secs`. Used by tests and
    /// local tooling; production tokens come from the account service, which
    /// shares the secret.
    pub fn issue_token(&self, user_id: &str, ttl_secs: i64) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: now,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Gate {
        let directory = MemoryDirectory::new();
        directory.insert("u-1", "hana");
        Gate::new("test-secret", Arc::new(directory))
    }

    #[tokio::test]
    async fn valid_token_admits() {
        let gate = gate();
        let token = gate.issue_token("u-1", 60).unwrap();
        let identity = gate.admit(Some(&token)).await.unwrap();
        assert_eq!(identity.user_id, "u-1");
        assert_eq!(identity.username, "hana");
    }

    #[tokio::test]
    async fn missing_token_refused() {
        let gate = gate();
        assert!(matches!(gate.admit(None).await, Err(AuthError::Missing)));
        assert!(matches!(gate.admit(Some("")).await, Err(AuthError::Missing)));
    }

    #[tokio::test]
    async fn garbage_token_refused() {
        let gate = gate();
        assert!(matches!(
            gate.admit(Some("not-a-token")).await,
            Err(AuthError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn expired_token_refused() {
        let gate = gate();
        let token = gate.issue_token("u-1", -120).unwrap();
        assert!(matches!(gate.admit(Some(&token)).await, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn unknown_subject_refused() {
        let gate = gate();
        let token = gate.issue_token("u-404", 60).unwrap();
        match gate.admit(Some(&token)).await {
            Err(AuthError::UnknownUser(subject)) => assert_eq!(subject, "u-404"),
            other => panic!("expected unknown-user rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_secret_refused() {
        let gate = gate();
        let directory = MemoryDirectory::new();
        directory.insert("u-1", "hana");
        let other = Gate::new("different-secret", Arc::new(directory));
        let token = other.issue_token("u-1", 60).unwrap();
        assert!(matches!(
            gate.admit(Some(&token)).await,
            Err(AuthError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn open_directory_accepts_any_subject() {
        let gate = Gate::new("s", Arc::new(OpenDirectory));
        let token = gate.issue_token("whoever", 60).unwrap();
        assert_eq!(gate.admit(Some(&token)).await.unwrap().user_id, "whoever");
    }
}
