//! Session gateway: credential checks, connection lifecycle and presence.

pub mod auth;
pub mod connection;
pub mod presence;

pub use auth::{Claims, CredentialVerifier, JwtVerifier};
pub use connection::{ConnectionId, ConnectionState};
pub use presence::{PresenceChange, PresenceTracker};

use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{AuthenticatedUser, UserRole};
use crate::websocket::{ConnectionRegistry, ServerEvent};
use std::sync::Arc;
use uuid::Uuid;

pub struct SessionGateway {
    verifier: Arc<dyn CredentialVerifier>,
    presence: Arc<PresenceTracker>,
    store: Arc<dyn ChatStore>,
    registry: ConnectionRegistry,
}

impl SessionGateway {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        presence: Arc<PresenceTracker>,
        store: Arc<dyn ChatStore>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            verifier,
            presence,
            store,
            registry,
        }
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Verify a bearer credential without touching any connection (REST).
    pub async fn verify(&self, credential: &str) -> AppResult<AuthenticatedUser> {
        self.verifier.verify(credential).await
    }

    /// Authenticate a realtime connection.
    ///
    /// The identity the client claims must be the one the credential
    /// carries. On success the connection is bound to the user and, if this
    /// is the user's first live connection, the other side of each of their
    /// active chats is told they came online.
    pub async fn authenticate(
        &self,
        connection: ConnectionId,
        state: &mut ConnectionState,
        claimed_user_id: Uuid,
        claimed_role: UserRole,
        credential: &str,
    ) -> AppResult<AuthenticatedUser> {
        let user = self.verifier.verify(credential).await?;
        if user.user_id != claimed_user_id || user.role != claimed_role {
            tracing::warn!(
                connection_id = %connection,
                claimed_user_id = %claimed_user_id,
                "credential does not match claimed identity"
            );
            return Err(AppError::Auth("credential does not match claimed identity".into()));
        }

        let already_bound = state.user().is_some();
        state.authenticate(user.clone())?;
        if already_bound {
            return Ok(user);
        }

        if !self.registry.bind_user(connection, user.user_id).await {
            return Err(AppError::InvalidState("connection is not registered".into()));
        }

        if self.presence.connect(&user, connection) == PresenceChange::CameOnline {
            self.announce_presence(&user, true).await;
        }

        tracing::info!(
            connection_id = %connection,
            user_id = %user.user_id,
            role = %user.role,
            "connection authenticated"
        );
        Ok(user)
    }

    /// Tear down a connection. Presence flips to offline only when the last
    /// connection of the user goes away.
    pub async fn disconnect(&self, connection: ConnectionId, user: Option<&AuthenticatedUser>) {
        self.registry.remove_connection(connection).await;

        let Some(user) = user else {
            return;
        };
        if self.presence.disconnect(user, connection) == PresenceChange::WentOffline {
            self.announce_presence(user, false).await;
        }
    }

    async fn announce_presence(&self, user: &AuthenticatedUser, online: bool) {
        let chats = match self.store.list_active_chats_for(user).await {
            Ok(chats) => chats,
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "presence fan-out skipped");
                return;
            }
        };

        for chat in chats {
            let event = if online {
                ServerEvent::UserOnline {
                    chat_id: chat.id,
                    user_id: user.user_id,
                    user_type: user.role,
                }
            } else {
                ServerEvent::UserOffline {
                    chat_id: chat.id,
                    user_id: user.user_id,
                    user_type: user.role,
                }
            };
            self.registry
                .broadcast_except(chat.id, user.user_id, &event)
                .await;
        }
    }
}
