use crate::{
    config::Config,
    db::ChatStore,
    error::{AppError, AppResult},
    gateway::{CredentialVerifier, PresenceTracker, SessionGateway},
    moderation::RuleSource,
    services::{
        ChannelManager, ChatLocks, MessagePipeline, ReadReceiptService, RealtimeNotifier,
        ReviewWorkflow, TypingBroadcaster, UserNotifier,
    },
    websocket::ConnectionRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub registry: ConnectionRegistry,
    /// Hot-reloadable moderation rules
    pub rules: Arc<RuleSource>,
    pub gateway: Arc<SessionGateway>,
    pub channels: Arc<ChannelManager>,
    pub pipeline: Arc<MessagePipeline>,
    pub receipts: Arc<ReadReceiptService>,
    pub typing: Arc<TypingBroadcaster>,
    pub reviews: Arc<ReviewWorkflow>,
    /// Per-chat send locks, shared by the pipeline and the channel manager
    pub locks: Arc<ChatLocks>,
}

impl AppState {
    /// Wire the core with rules loaded from the configured source and
    /// warnings delivered over the realtime connections.
    pub fn new(
        config: Config,
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> AppResult<Self> {
        let rules = RuleSource::load(config.rules_path.clone(), config.rule_policy())
            .map_err(|e| AppError::Config(format!("moderation rules: {e}")))?;
        let registry = ConnectionRegistry::new();
        let notifier = Arc::new(RealtimeNotifier::new(registry.clone()));

        Ok(Self::with_parts(
            config,
            store,
            verifier,
            registry,
            Arc::new(rules),
            notifier,
        ))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn CredentialVerifier>,
        registry: ConnectionRegistry,
        rules: Arc<RuleSource>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        let presence = Arc::new(PresenceTracker::new());
        let locks = Arc::new(ChatLocks::new());

        let gateway = Arc::new(SessionGateway::new(
            verifier,
            presence.clone(),
            store.clone(),
            registry.clone(),
        ));
        let channels = Arc::new(ChannelManager::new(
            store.clone(),
            registry.clone(),
            presence,
            locks.clone(),
            config.history_limit,
        ));
        let pipeline = Arc::new(MessagePipeline::new(
            store.clone(),
            channels.clone(),
            rules.clone(),
            locks.clone(),
            config.max_message_length,
        ));
        let receipts = Arc::new(ReadReceiptService::new(store.clone(), channels.clone()));
        let typing = Arc::new(TypingBroadcaster::new(config.typing_ttl, registry.clone()));
        let reviews = Arc::new(ReviewWorkflow::new(store.clone(), channels.clone(), notifier));

        Self {
            config: Arc::new(config),
            store,
            registry,
            rules,
            gateway,
            channels,
            pipeline,
            receipts,
            typing,
            reviews,
            locks,
        }
    }
}
