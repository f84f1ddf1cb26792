use super::user::{AuthenticatedUser, UserRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Chat session status. Sessions are never deleted, only closed or blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Active,
    Closed,
    Blocked,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Active => "active",
            ChatStatus::Closed => "closed",
            ChatStatus::Blocked => "blocked",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ChatStatus::Active)
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ChatStatus::Active),
            "closed" => Ok(ChatStatus::Closed),
            "blocked" => Ok(ChatStatus::Blocked),
            other => Err(format!("unknown chat status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub client_id: Uuid,
    pub store_id: Uuid,
}

/// Catalog product the conversation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: Uuid,
    pub name: String,
}

/// Live presence of both sides. Filled in from the presence tracker when a
/// chat is handed out; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceFlags {
    pub client_online: bool,
    pub store_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub participants: Participants,
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductRef>,
    pub status: ChatStatus,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub presence: PresenceFlags,
}

impl ChatSession {
    /// New active session opened by a client about a store (and optionally a product)
    pub fn open(client: &AuthenticatedUser, store_id: Uuid, product: Option<ProductRef>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            participants: Participants {
                client_id: client.user_id,
                store_id,
            },
            client_name: client.display_name.clone(),
            product,
            status: ChatStatus::Active,
            last_activity: now,
            created_at: now,
            presence: PresenceFlags::default(),
        }
    }

    /// Clients match on their own id, store managers on the store they act for.
    /// Admins are never participants.
    pub fn is_participant(&self, user: &AuthenticatedUser) -> bool {
        match user.role {
            UserRole::Client => user.user_id == self.participants.client_id,
            UserRole::StoreManager => user.store_id == Some(self.participants.store_id),
            UserRole::Admin => false,
        }
    }

    pub fn is_client(&self, user: &AuthenticatedUser) -> bool {
        user.role == UserRole::Client && user.user_id == self.participants.client_id
    }

    pub fn product_name(&self) -> Option<&str> {
        self.product.as_ref().map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Client,
            display_name: "María".into(),
            store_id: None,
        }
    }

    #[test]
    fn test_participant_rules() {
        let buyer = client();
        let store_id = Uuid::new_v4();
        let chat = ChatSession::open(&buyer, store_id, None);

        assert!(chat.is_participant(&buyer));
        assert!(chat.is_client(&buyer));

        let manager = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::StoreManager,
            display_name: "Tienda".into(),
            store_id: Some(store_id),
        };
        assert!(chat.is_participant(&manager));
        assert!(!chat.is_client(&manager));

        let other_manager = AuthenticatedUser {
            store_id: Some(Uuid::new_v4()),
            ..manager.clone()
        };
        assert!(!chat.is_participant(&other_manager));

        let admin = AuthenticatedUser {
            role: UserRole::Admin,
            store_id: None,
            ..manager
        };
        assert!(!chat.is_participant(&admin));
        assert!(!chat.is_participant(&client()));
    }

    #[test]
    fn test_new_chat_is_active() {
        let chat = ChatSession::open(
            &client(),
            Uuid::new_v4(),
            Some(ProductRef {
                id: Uuid::new_v4(),
                name: "Filtro de aceite".into(),
            }),
        );
        assert_eq!(chat.status, ChatStatus::Active);
        assert_eq!(chat.product_name(), Some("Filtro de aceite"));
        assert_eq!(chat.presence, PresenceFlags::default());
    }
}
