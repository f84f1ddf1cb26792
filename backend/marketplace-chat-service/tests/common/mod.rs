#![allow(dead_code)]

use marketplace_chat_service::{
    config::Config,
    db::{ChatStore, InMemoryChatStore},
    gateway::JwtVerifier,
    models::{AuthenticatedUser, ChatSession, UserRole},
    state::AppState,
    websocket::ChatConnection,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const SECRET: &str = "test-secret";

pub struct Harness {
    pub app: AppState,
    pub store: Arc<dyn ChatStore>,
    pub signer: JwtVerifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryChatStore::new()))
    }

    pub fn with_store(store: Arc<dyn ChatStore>) -> Self {
        let verifier = Arc::new(JwtVerifier::new(SECRET));
        let app = AppState::new(Config::test_defaults(), store.clone(), verifier)
            .expect("app state");
        Self {
            app,
            store,
            signer: JwtVerifier::new(SECRET),
        }
    }

    pub fn token(&self, user: &AuthenticatedUser) -> String {
        self.signer.sign(user, 3600).expect("sign")
    }

    /// Client opens a chat with the store over REST semantics.
    pub async fn open_chat(&self, client: &AuthenticatedUser, store_id: Uuid) -> ChatSession {
        self.app
            .channels
            .open_chat(client, store_id, None)
            .await
            .expect("open chat")
    }

    /// Open a realtime connection and authenticate it.
    pub async fn connect(&self, user: &AuthenticatedUser) -> anyhow::Result<Peer> {
        let (conn, rx) = ChatConnection::open(self.app.clone()).await?;
        let mut peer = Peer {
            conn,
            rx,
            user: user.clone(),
        };
        peer.command(json!({
            "type": "authenticate",
            "user_id": user.user_id,
            "user_type": user.role,
            "credential": self.token(user),
        }))
        .await;

        let reply = peer.next().ok_or_else(|| anyhow::anyhow!("no reply to authenticate"))?;
        anyhow::ensure!(reply["type"] == "authenticated", "unexpected reply {reply}");
        Ok(peer)
    }
}

pub struct Peer {
    pub conn: ChatConnection,
    pub rx: UnboundedReceiver<String>,
    pub user: AuthenticatedUser,
}

impl Peer {
    pub async fn command(&mut self, command: Value) {
        self.conn.handle_text(&command.to_string()).await;
    }

    pub async fn join(&mut self, chat_id: Uuid) -> Value {
        self.command(json!({ "type": "join_chat", "chat_id": chat_id }))
            .await;
        self.next().expect("join reply")
    }

    pub async fn say(&mut self, chat_id: Uuid, content: &str) {
        self.command(json!({
            "type": "send_message",
            "chat_id": chat_id,
            "content": content,
        }))
        .await;
    }

    pub fn next(&mut self) -> Option<Value> {
        self.rx
            .try_recv()
            .ok()
            .map(|raw| serde_json::from_str(&raw).expect("event is json"))
    }

    pub fn drain(&mut self) -> Vec<Value> {
        std::iter::from_fn(|| self.next()).collect()
    }

    pub fn of_type(&mut self, kind: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|e| e["type"] == kind)
            .collect()
    }
}

pub fn client(name: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: Uuid::new_v4(),
        role: UserRole::Client,
        display_name: name.to_string(),
        store_id: None,
    }
}

pub fn manager(store_id: Uuid) -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: Uuid::new_v4(),
        role: UserRole::StoreManager,
        display_name: "Repuestos Caracas".to_string(),
        store_id: Some(store_id),
    }
}

pub fn admin() -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: Uuid::new_v4(),
        role: UserRole::Admin,
        display_name: "Moderación".to_string(),
        store_id: None,
    }
}
