//! Shared authentication state.
//!
//! An [`AuthContext`] is created once and handed to everything that needs to know who is signed
//! in. All clones observe the same state. Tokens are passed along as they are, nothing here
//! validates or refreshes them.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(pub String);

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<auth token>")
    }
}

impl AuthToken {
    /// The value of an `Authorization` header carrying this token.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

#[derive(Clone, Debug)]
struct AuthState {
    token: AuthToken,
}

/// Who is currently signed in, if anybody.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    state: Arc<RwLock<Option<AuthState>>>,
}

impl AuthContext {
    /// Creates a context nobody is signed in to.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that is already signed in with `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let context = Self::new();
        context.sign_in(token);
        context
    }

    pub fn token(&self) -> Option<AuthToken> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.as_ref().map(|state| state.token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.token().is_some()
    }

    /// Replaces the current token, if any.
    pub fn sign_in(&self, token: impl Into<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = Some(AuthState {
            token: AuthToken(token.into()),
        });
        tracing::debug!("Signed in");
    }

    pub fn sign_out(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.take().is_some() {
            tracing::debug!("Signed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let auth = AuthContext::new();
        let other = auth.clone();
        assert!(!other.is_signed_in());

        auth.sign_in("secret");
        assert_eq!(other.token(), Some(AuthToken("secret".into())));
        assert_eq!(other.token().unwrap().bearer(), "Bearer secret");

        other.sign_out();
        assert!(!auth.is_signed_in());
    }

    #[test]
    fn test_token_is_redacted() {
        let auth = AuthContext::with_token("secret");
        let debug = format!("{auth:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<auth token>"));
    }
}
