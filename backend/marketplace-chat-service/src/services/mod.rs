pub mod channel_manager;
pub mod chat_locks;
pub mod message_pipeline;
pub mod notifier;
pub mod read_receipts;
pub mod review_workflow;
pub mod typing_broadcaster;

pub use channel_manager::ChannelManager;
pub use chat_locks::ChatLocks;
pub use message_pipeline::{MessagePipeline, SendOutcome};
pub use notifier::{RealtimeNotifier, UserNotifier};
pub use read_receipts::ReadReceiptService;
pub use review_workflow::ReviewWorkflow;
pub use typing_broadcaster::TypingBroadcaster;
