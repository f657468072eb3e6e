use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// An authenticated identity issued by the external auth provider. The
/// access token is an opaque bearer string; the client never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub access_token: String,
}

/// Holds the current identity for the lifetime of the client. Operations
/// that need an identity fail with `AuthRequired` when none is present,
/// which callers treat as a prompt to sign in rather than a hard failure.
#[derive(Debug, Default)]
pub struct AuthSession {
    identity: RwLock<Option<Identity>>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }

    pub fn set_identity(&self, identity: Identity) {
        tracing::info!(user_id = %identity.user_id, "Identity set");
        *self.identity.write().unwrap() = Some(identity);
    }

    pub fn clear(&self) {
        *self.identity.write().unwrap() = None;
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().unwrap().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.read().unwrap().is_some()
    }

    /// Current identity, or `AuthRequired`
    pub fn require(&self) -> Result<Identity> {
        self.identity().ok_or(ClientError::AuthRequired)
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.identity
            .read()
            .unwrap()
            .as_ref()
            .map(|i| i.access_token.clone())
    }
}
