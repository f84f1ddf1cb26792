//! Per-connection session object.
//!
//! A [`ChatConnection`] is created when a socket is upgraded and dropped when
//! it closes. It owns the connection's state machine and runs its commands
//! one at a time; everything it says to the client goes through the
//! registry so replies and broadcasts share one ordered outbound channel.

use super::events::ServerEvent;
use super::message_types::ClientCommand;
use crate::error::{AppError, AppResult};
use crate::gateway::{ConnectionId, ConnectionState};
use crate::metrics;
use crate::models::AuthenticatedUser;
use crate::state::AppState;
use error_types::error_codes;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct ChatConnection {
    id: ConnectionId,
    state: ConnectionState,
    app: AppState,
}

impl ChatConnection {
    /// Register a fresh connection. The returned receiver yields every
    /// payload destined for the client, in order.
    pub async fn open(app: AppState) -> AppResult<(Self, UnboundedReceiver<String>)> {
        let id = ConnectionId::new();
        let mut state = ConnectionState::default();
        state.begin_connect()?;
        let outbound = app.registry.register(id).await;
        state.established()?;

        metrics::WS_CONNECTIONS.inc();
        tracing::debug!(connection_id = %id, "connection opened");
        Ok((Self { id, state, app }, outbound))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.state.user()
    }

    /// Handle one inbound text frame. Unparseable frames get a
    /// `BAD_REQUEST` error and the connection stays open.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle_command(command).await,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "unparseable frame");
                self.send(ServerEvent::error(
                    error_codes::BAD_REQUEST,
                    format!("invalid command: {e}"),
                    None,
                ))
                .await;
            }
        }
    }

    pub async fn handle_command(&mut self, command: ClientCommand) {
        let name = command.name();

        if let ClientCommand::Authenticate {
            user_id,
            user_type,
            credential,
        } = command
        {
            let result = self
                .app
                .gateway
                .authenticate(self.id, &mut self.state, user_id, user_type, &credential)
                .await;
            let event = match result {
                Ok(user) => ServerEvent::Authenticated { user },
                Err(e) => ServerEvent::AuthError {
                    message: e.to_string(),
                },
            };
            self.send(event).await;
            return;
        }

        let Some(user) = self.state.user().cloned() else {
            self.send(ServerEvent::error(
                error_codes::UNAUTHENTICATED,
                "authenticate first",
                Some(name),
            ))
            .await;
            return;
        };

        if let Err(e) = self.dispatch(&user, command).await {
            if e.status_code() >= 500 {
                tracing::error!(connection_id = %self.id, command = name, error = %e, "command failed");
            } else {
                tracing::debug!(connection_id = %self.id, command = name, error = %e, "command rejected");
            }
            self.send(error_event(&e, name)).await;
        }
    }

    async fn dispatch(&mut self, user: &AuthenticatedUser, command: ClientCommand) -> AppResult<()> {
        match command {
            ClientCommand::Authenticate { .. } => Ok(()),

            ClientCommand::JoinChat { chat_id } => {
                let (chat, messages) = self.app.channels.join(user, self.id, chat_id).await?;
                self.send(ServerEvent::ChatHistory { chat, messages }).await;
                Ok(())
            }

            ClientCommand::LeaveChat { chat_id } => {
                if self.app.typing.tracker().is_typing(self.id, chat_id) {
                    self.app.typing.set_typing(user, self.id, chat_id, false).await?;
                }
                self.app.channels.leave(self.id, chat_id).await;
                Ok(())
            }

            ClientCommand::SendMessage {
                chat_id,
                content,
                message_type,
            } => {
                let outcome = self
                    .app
                    .pipeline
                    .send(user, chat_id, &content, message_type)
                    .await?;

                // subscribers already got `new_message` from the broadcast
                let echoed = !outcome.is_blocked()
                    && self.app.registry.is_subscribed(chat_id, self.id).await;
                if !echoed {
                    self.send(outcome.sender_event()).await;
                }
                Ok(())
            }

            ClientCommand::MarkAsRead {
                chat_id,
                message_ids,
            } => {
                self.app
                    .receipts
                    .mark_as_read(user, chat_id, &message_ids)
                    .await?;
                Ok(())
            }

            ClientCommand::Typing { chat_id, is_typing } => {
                self.app
                    .typing
                    .set_typing(user, self.id, chat_id, is_typing)
                    .await
            }
        }
    }

    /// Transport loss: unsubscribe everywhere, clear typing and presence.
    pub async fn disconnect(&mut self) {
        self.app.typing.clear_connection(self.id).await;
        let user = self.state.lost();
        self.app.gateway.disconnect(self.id, user.as_ref()).await;

        metrics::WS_CONNECTIONS.dec();
        tracing::debug!(
            connection_id = %self.id,
            user_id = ?user.map(|u| u.user_id),
            "connection closed"
        );
    }

    async fn send(&self, event: ServerEvent) {
        if !self.app.registry.send_to_connection(self.id, &event).await {
            tracing::debug!(
                connection_id = %self.id,
                event = event.event_type(),
                "dropped event for closed connection"
            );
        }
    }
}

fn error_event(error: &AppError, command: &str) -> ServerEvent {
    let message = match error {
        AppError::Database(_) | AppError::Internal(_) => "internal server error".to_string(),
        other => other.to_string(),
    };
    let code = match error {
        AppError::Database(_) | AppError::Internal(_) => error_codes::INTERNAL,
        other => other.code(),
    };
    ServerEvent::error(code, message, Some(command))
}
