//! Session-token authentication boundary.
//!
//! Credential validation (passwords, external identity providers) is a
//! separate concern; the server only needs a way to resolve a bearer token
//! to a user identity.  [`SessionTokens`] is the built-in implementation:
//! an in-memory issuer of opaque tokens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use missive_shared::types::UserId;

/// Resolves a bearer token to the authenticated user.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// In-memory token registry.  Tokens are opaque and live until revoked or
/// the process restarts.
#[derive(Clone, Default)]
pub struct SessionTokens {
    tokens: Arc<Mutex<HashMap<String, UserId>>>,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for a user.
    pub fn issue(&self, user: UserId) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.lock().insert(token.clone(), user);
        token
    }

    /// Invalidate a token.  Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserId>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Authenticator for SessionTokens {
    fn authenticate(&self, token: &str) -> Option<UserId> {
        self.lock().get(token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_authenticate_revoke() {
        let tokens = SessionTokens::new();
        let user = UserId::new();

        let token = tokens.issue(user);
        assert_eq!(tokens.authenticate(&token), Some(user));

        assert!(tokens.revoke(&token));
        assert_eq!(tokens.authenticate(&token), None);
        assert!(!tokens.revoke(&token));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let tokens = SessionTokens::new();
        assert_eq!(tokens.authenticate("nope"), None);
    }
}
