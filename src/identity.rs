//! Current-user resolution.
//!
//! The conversation store only needs a stable uid and the tri-state signal
//! below; how users actually log in is up to the provider.

use tokio::sync::watch;
use tracing::info;

use crate::models::User;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No answer from the provider yet.
    #[default]
    Unresolved,
    /// Explicitly logged out.
    SignedOut,
    SignedIn(User),
}

impl AuthState {
    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::SignedIn(user) => Some(user),
            _ => None,
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    /// Subscribe to auth-state changes. The receiver starts at the current state.
    fn subscribe(&self) -> watch::Receiver<AuthState>;
}

/// In-process session holder: whoever authenticates the user calls
/// [`SessionIdentity::sign_in`] / [`SessionIdentity::sign_out`].
pub struct SessionIdentity {
    state: watch::Sender<AuthState>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::Unresolved);
        Self { state }
    }

    pub fn sign_in(&self, user: User) {
        info!(user_id = %user.uid, "User signed in");
        self.state.send_replace(AuthState::SignedIn(user));
    }

    pub fn sign_out(&self) {
        info!("User signed out");
        self.state.send_replace(AuthState::SignedOut);
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for SessionIdentity {
    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions_in_order() {
        let identity = SessionIdentity::new();
        let mut rx = identity.subscribe();
        assert_eq!(*rx.borrow(), AuthState::Unresolved);

        identity.sign_in(User::new("u1"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().user().map(|u| u.uid.as_str()), Some("u1"));

        identity.sign_out();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AuthState::SignedOut);
    }
}
