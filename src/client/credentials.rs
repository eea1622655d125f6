//! Bearer credential supply
//!
//! The executor asks a [`CredentialProvider`] for a token on every attempt so a
//! token refreshed by the authentication layer is picked up by the next retry.
//! Having no token is a valid state: the call goes out anonymously.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Supplies an optional bearer token
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    fn bearer_token(&self) -> Option<String>;
}

/// Provider for anonymous access
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Token held in memory, replaceable at runtime (login, logout, refresh)
#[derive(Clone, Default)]
pub struct StaticCredentials {
    token: Arc<RwLock<Option<String>>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.filter(|t| !t.trim().is_empty()))),
        }
    }

    /// Replaces the held token; `None` logs the client out
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token.filter(|t| !t.trim().is_empty());
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self.token.read().is_some();
        f.debug_struct("StaticCredentials")
            .field("token", &if present { "<redacted>" } else { "<none>" })
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}
