//! Auth collaborator contract.
//!
//! Authentication itself lives outside this crate; the capture pipeline
//! only depends on "a signed-in identity exists before start() is
//! callable". The static provider covers the CLI and tests.

use std::sync::RwLock;

/// A signed-in user identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: Option<String>,
}

/// Current authentication state as reported by the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The collaborator has not resolved the user yet
    Pending,
    SignedOut,
    SignedIn(UserIdentity),
}

pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> AuthState;

    fn sign_out(&self);
}

/// In-memory provider with a fixed identity
pub struct StaticAuthProvider {
    state: RwLock<AuthState>,
}

impl StaticAuthProvider {
    pub fn signed_in(user_id: &str) -> Self {
        Self {
            state: RwLock::new(AuthState::SignedIn(UserIdentity {
                user_id: user_id.to_string(),
                email: None,
            })),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            state: RwLock::new(AuthState::SignedOut),
        }
    }
}

impl AuthProvider for StaticAuthProvider {
    fn current_user(&self) -> AuthState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or(AuthState::SignedOut)
    }

    fn sign_out(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = AuthState::SignedOut;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_sign_out() {
        let provider = StaticAuthProvider::signed_in("therapist-1");
        assert!(matches!(provider.current_user(), AuthState::SignedIn(_)));

        provider.sign_out();
        assert_eq!(provider.current_user(), AuthState::SignedOut);
    }
}
