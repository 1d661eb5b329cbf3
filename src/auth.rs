//! API key sign-in against the sync server.
//!
//! Credentials live in `<data_dir>/credentials.yaml`:
//! ```yaml
//! api_key: "your-secret-key-here"
//! user_id: "alice"
//! ```

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use todolist_core::{AuthError, AuthProvider, UserId};

use crate::client::{fetch_identity, ClientError};

const CREDENTIALS_FILE: &str = "credentials.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub user_id: String,
}

/// [`AuthProvider`] that validates API keys through the server's `/me`
/// endpoint and remembers the result on disk.
#[derive(Debug)]
pub struct ApiKeyAuth {
    server_url: Option<String>,
    path: PathBuf,
    current: RwLock<Option<Credentials>>,
}

impl ApiKeyAuth {
    /// Loads stored credentials from `data_dir`, if any.
    ///
    /// An unreadable credentials file is logged and treated as signed out.
    pub fn load(server_url: Option<String>, data_dir: &Path) -> Self {
        let path = data_dir.join(CREDENTIALS_FILE);
        let current = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_yaml::from_str::<Credentials>(&contents) {
                Ok(credentials) => Some(credentials),
                Err(e) => {
                    tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        };

        Self {
            server_url,
            path,
            current: RwLock::new(current),
        }
    }

    pub fn credentials_path(&self) -> &Path {
        &self.path
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn api_key(&self) -> Option<String> {
        self.credentials().map(|c| c.api_key)
    }

    fn store(&self, credentials: Option<Credentials>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    fn save(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        let contents =
            serde_yaml::to_string(credentials).map_err(|e| AuthError::Storage(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| AuthError::Storage(e.to_string()))
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuth {
    fn current_user(&self) -> Option<UserId> {
        self.credentials().map(|c| UserId::new(c.user_id))
    }

    async fn sign_in(&self, credential: &str) -> Result<UserId, AuthError> {
        let api_key = credential.trim();
        if api_key.is_empty() {
            return Err(AuthError::Rejected("API key is empty".to_string()));
        }
        let server_url = self
            .server_url
            .as_deref()
            .ok_or_else(|| AuthError::Unavailable(ClientError::NotConfigured.to_string()))?;

        let me = fetch_identity(server_url, api_key)
            .await
            .map_err(|e| match e {
                ClientError::Unauthorized => AuthError::Rejected(e.to_string()),
                other => AuthError::Unavailable(other.to_string()),
            })?;

        let credentials = Credentials {
            api_key: api_key.to_string(),
            user_id: me.user_id,
        };
        self.save(&credentials)?;
        tracing::info!("signed in as {}", credentials.user_id);

        let user = UserId::new(credentials.user_id.clone());
        self.store(Some(credentials));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AuthError::Storage(e.to_string())),
        }
        self.store(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_without_credentials() {
        let dir = tempdir().unwrap();
        let auth = ApiKeyAuth::load(None, dir.path());
        assert!(auth.current_user().is_none());
        assert!(auth.api_key().is_none());
    }

    #[test]
    fn test_load_stored_credentials() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CREDENTIALS_FILE),
            "api_key: secret\nuser_id: alice\n",
        )
        .unwrap();

        let auth = ApiKeyAuth::load(None, dir.path());
        assert_eq!(auth.current_user(), Some(UserId::new("alice")));
        assert_eq!(auth.api_key().as_deref(), Some("secret"));
    }

    #[test]
    fn test_malformed_credentials_are_signed_out() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CREDENTIALS_FILE), "api_key: [").unwrap();

        let auth = ApiKeyAuth::load(None, dir.path());
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_removes_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CREDENTIALS_FILE),
            "api_key: secret\nuser_id: alice\n",
        )
        .unwrap();
        let auth = ApiKeyAuth::load(None, dir.path());

        auth.sign_out().await.unwrap();
        assert!(auth.current_user().is_none());
        assert!(!auth.credentials_path().exists());

        // Signing out twice is fine
        auth.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_without_server_is_unavailable() {
        let dir = tempdir().unwrap();
        let auth = ApiKeyAuth::load(None, dir.path());

        let err = auth.sign_in("secret").await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_rejects_blank_key() {
        let dir = tempdir().unwrap();
        let auth = ApiKeyAuth::load(Some("http://127.0.0.1:1".to_string()), dir.path());

        let err = auth.sign_in("   ").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
    }
}
