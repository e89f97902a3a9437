//! Access/refresh credential pair and its on-disk store

use crate::error::Result;
use crate::state;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// OAuth credential owned by the [`CredentialGuardian`](super::CredentialGuardian).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

/// Tokens this close to expiry are treated as expired
const EXPIRY_MARGIN_SECS: i64 = 10;

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: refresh_token.into(),
            expiry,
        }
    }

    /// Expired, or expiring within a few seconds of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= now
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// JSON file holding the current credential.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` if no credential was ever saved; a corrupt file is an error.
    pub async fn load(&self) -> Result<Option<Credential>> {
        state::read_json(&self.path).await
    }

    pub async fn save(&self, credential: &Credential) -> Result<()> {
        tracing::info!(path = %self.path.display(), "Saving credential file");
        state::write_json_atomic(&self.path, credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let cred = Credential::new("a", "r", now + Duration::minutes(5));
        assert!(!cred.is_expired_at(now));
        assert!(cred.is_expired_at(now + Duration::minutes(5)));
    }

    #[test]
    fn test_expiring_soon_counts_as_expired() {
        let now = Utc::now();
        let cred = Credential::new("a", "r", now + Duration::seconds(5));
        assert!(cred.is_expired_at(now));

        let cred = Credential::new("a", "r", now + Duration::seconds(30));
        assert!(!cred.is_expired_at(now));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = Credential::new("secret-access", "secret-refresh", Utc::now());
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn test_bearer() {
        let cred = Credential::new("abc", "r", Utc::now());
        assert_eq!(cred.bearer(), "Bearer abc");
    }

    #[test]
    fn test_deserialize_without_optional_fields() {
        let cred: Credential = serde_json::from_str(
            r#"{"access_token":"a","expiry":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(cred.token_type, "Bearer");
        assert!(cred.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        assert!(store.load().await.unwrap().is_none());

        let cred = Credential::new("a", "r", Utc::now());
        store.save(&cred).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cred));
    }

    #[tokio::test]
    async fn test_store_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let store = CredentialStore::new(path);
        assert!(matches!(store.load().await, Err(Error::Persistence(_))));
    }
}
