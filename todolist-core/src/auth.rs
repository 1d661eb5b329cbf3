//! Authentication boundary.
//!
//! The core only needs to know whether someone is signed in and under
//! which opaque id. Signing in and out is delegated to a provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque id of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Sign-in rejected: {0}")]
    Rejected(String),
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Source of the current user and the sign-in/sign-out actions.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    async fn sign_in(&self, credential: &str) -> Result<UserId, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}
