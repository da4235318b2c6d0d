use crate::error::{PortalError, PortalResult};
use crate::features::model::PortalUser;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// An authenticated client session. Owned by the application root and passed
/// explicitly to every store call that needs a credential.
pub struct Session {
    user: PortalUser,
    token: SecretString,
}

impl Session {
    pub fn new(user: PortalUser, token: impl Into<String>) -> Self {
        Self {
            user,
            token: SecretString::from(token.into()),
        }
    }

    pub fn user(&self) -> &PortalUser {
        &self.user
    }

    pub(crate) fn bearer(&self) -> PortalResult<String> {
        let raw = self.token.expose_secret();
        if raw.trim().is_empty() {
            return Err(PortalError::Unauthenticated);
        }
        Ok(format!("Bearer {raw}"))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.email)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolves the credential for an authenticated call.
pub fn require(session: Option<&Session>) -> PortalResult<&Session> {
    session.ok_or(PortalError::Unauthenticated)
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, identifier: &str, password: &str) -> PortalResult<Session>;
}
