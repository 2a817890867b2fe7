//! Session model

use serde::{Deserialize, Serialize};

use super::user::{RoleSet, User};

/// Access/refresh token pair issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Result of OTP verification or invite acceptance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub tokens: TokenPair,
    pub user: User,
}

/// Read-only view of the session state held by the session store.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub roles: RoleSet,
    pub tokens: Option<TokenPair>,
    /// Session resolution (boot rehydration) still in flight
    pub is_loading: bool,
    /// Role resolution still in flight
    pub roles_loading: bool,
    pub is_authenticated: bool,
}

impl SessionSnapshot {
    /// State before the stored session has been read
    pub fn initial() -> Self {
        Self {
            is_loading: true,
            ..Self::signed_out()
        }
    }

    /// Resolved state with no session
    pub fn signed_out() -> Self {
        Self {
            user: None,
            roles: RoleSet::new(),
            tokens: None,
            is_loading: false,
            roles_loading: false,
            is_authenticated: false,
        }
    }

    /// Session and roles both resolved
    pub fn is_resolved(&self) -> bool {
        !self.is_loading && !self.roles_loading
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access.as_str())
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}
