use crate::conversation::Conversation;
use crate::message::{ChatMessage, TypingState};
use crate::transport::ConnectionStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Store change notifications the presentation layer re-renders from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A message was appended to the log
    MessageAdded(ChatMessage),

    /// The whole log was replaced, e.g. with history supplied on resume
    MessagesReplaced(Vec<ChatMessage>),

    /// The active conversation changed (started, resumed, or cleared)
    ConversationChanged(Option<Conversation>),

    /// The typing indicator was overwritten
    TypingChanged(TypingState),

    /// The mirrored transport status changed
    ConnectionChanged(ConnectionStatus),

    /// Unread counter moved
    UnreadChanged(u32),

    /// The store was reset to its initial state
    StoreReset,
}

pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StoreEvent) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
