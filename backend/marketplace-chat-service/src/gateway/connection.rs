use crate::error::{AppError, AppResult};
use crate::models::AuthenticatedUser;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one realtime connection.
///
/// Every socket gets its own id, so a user with two tabs open is two
/// connections and cleanup never touches the sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a connection:
/// `Disconnected -> Connecting -> Connected -> Authenticated`, and back to
/// `Disconnected` from anywhere on loss.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticated(AuthenticatedUser),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated(_) => "authenticated",
        }
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            ConnectionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Authenticated(_)
        )
    }

    pub fn begin_connect(&mut self) -> AppResult<()> {
        match self {
            ConnectionState::Disconnected => {
                *self = ConnectionState::Connecting;
                Ok(())
            }
            other => Err(invalid("connect", other)),
        }
    }

    pub fn established(&mut self) -> AppResult<()> {
        match self {
            ConnectionState::Connecting => {
                *self = ConnectionState::Connected;
                Ok(())
            }
            other => Err(invalid("establish", other)),
        }
    }

    /// A connection binds to one identity. Re-authenticating as the same
    /// user is accepted; switching users is not.
    pub fn authenticate(&mut self, user: AuthenticatedUser) -> AppResult<()> {
        match self {
            ConnectionState::Connected => {
                *self = ConnectionState::Authenticated(user);
                Ok(())
            }
            ConnectionState::Authenticated(current) if current.user_id == user.user_id => {
                *current = user;
                Ok(())
            }
            ConnectionState::Authenticated(_) => Err(AppError::Auth(
                "connection is already bound to another user".into(),
            )),
            other => Err(invalid("authenticate", other)),
        }
    }

    /// Returns the identity the connection held, if any.
    pub fn lost(&mut self) -> Option<AuthenticatedUser> {
        match std::mem::take(self) {
            ConnectionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

fn invalid(action: &str, state: &ConnectionState) -> AppError {
    AppError::InvalidState(format!("cannot {action} while {}", state.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;

    fn user() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Client,
            display_name: "Carla".into(),
            store_id: None,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut state = ConnectionState::default();
        state.begin_connect().unwrap();
        assert!(!state.is_open());
        state.established().unwrap();
        assert!(state.is_open());

        let who = user();
        state.authenticate(who.clone()).unwrap();
        assert_eq!(state.user(), Some(&who));

        assert_eq!(state.lost(), Some(who));
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_cannot_authenticate_before_connected() {
        let mut state = ConnectionState::Connecting;
        assert!(matches!(
            state.authenticate(user()),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn test_identity_cannot_switch() {
        let mut state = ConnectionState::Connected;
        let first = user();
        state.authenticate(first.clone()).unwrap();

        assert!(state.authenticate(first.clone()).is_ok());
        assert!(matches!(state.authenticate(user()), Err(AppError::Auth(_))));
        assert_eq!(state.user().map(|u| u.user_id), Some(first.user_id));
    }

    #[test]
    fn test_lost_from_any_state() {
        let mut state = ConnectionState::Connected;
        assert_eq!(state.lost(), None);
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(state.established().is_err());
    }
}
