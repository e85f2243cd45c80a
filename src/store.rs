use crate::bus::{EventBus, StoreEvent};
use crate::conversation::{AgentInfo, Conversation, Ownership};
use crate::message::{ChatMessage, MessageKind, Sender, TypingState};
use crate::ownership::transition_narrative;
use crate::transport::ConnectionStatus;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// The subset of store state that survives a process restart. Everything
/// else (open flag, unread counter, typing, connection status) is
/// meaningless across a reload and starts fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

/// Single source of truth for conversation state. All mutations are
/// synchronous and atomic; only the orchestrator and the fallback
/// simulator call the mutators, the UI only reads.
pub struct ChatStore {
    conversation: Option<Conversation>,
    messages: Vec<ChatMessage>,
    is_open: bool,
    unread_count: u32,
    typing: TypingState,
    connection_status: ConnectionStatus,
    bus: Arc<EventBus>,
}

impl ChatStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            conversation: None,
            messages: Vec::new(),
            is_open: false,
            unread_count: 0,
            typing: TypingState::idle(),
            connection_status: ConnectionStatus::Disconnected,
            bus,
        }
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    pub fn typing(&self) -> &TypingState {
        &self.typing
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn set_conversation(&mut self, conversation: Option<Conversation>) {
        self.conversation = conversation;
        self.bus
            .publish(StoreEvent::ConversationChanged(self.conversation.clone()));
    }

    /// Append a message to the log. Messages addressed to a conversation
    /// other than the active one are dropped; a stale timer or late network
    /// event must not resurrect a closed conversation.
    pub fn add_message(&mut self, message: ChatMessage) {
        match &self.conversation {
            Some(c) if c.id == message.conversation_id => {}
            Some(c) => {
                warn!(
                    "Dropping message for stale conversation {} (active: {})",
                    message.conversation_id, c.id
                );
                return;
            }
            None => {
                warn!(
                    "Dropping message for conversation {} (no active conversation)",
                    message.conversation_id
                );
                return;
            }
        }

        if !self.is_open && message.kind != MessageKind::User {
            self.unread_count += 1;
            self.bus.publish(StoreEvent::UnreadChanged(self.unread_count));
        }

        debug!("Appending {:?} message {}", message.kind, message.id);
        self.messages.push(message.clone());
        self.bus.publish(StoreEvent::MessageAdded(message));
    }

    /// Replace the whole log, e.g. with history supplied on resume.
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.bus
            .publish(StoreEvent::MessagesReplaced(self.messages.clone()));
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.bus.publish(StoreEvent::MessagesReplaced(Vec::new()));
    }

    /// Opening the surface counts as having seen everything that arrived
    /// while it was closed.
    pub fn set_is_open(&mut self, is_open: bool) {
        self.is_open = is_open;
        if is_open && self.unread_count != 0 {
            self.unread_count = 0;
            self.bus.publish(StoreEvent::UnreadChanged(0));
        }
    }

    pub fn set_typing(&mut self, typing: TypingState) {
        self.typing = typing.clone();
        self.bus.publish(StoreEvent::TypingChanged(typing));
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if self.connection_status != status {
            self.connection_status = status;
            self.bus.publish(StoreEvent::ConnectionChanged(status));
        }
    }

    /// Update the conversation owner and, for hand-offs to an agent or back
    /// to the assistant, append the system message narrating the change.
    /// Transitions into `System` are applied silently. Not idempotent at the
    /// message-log level: repeating a transition narrates it again.
    pub fn update_ownership(&mut self, new_ownership: Ownership, agent_info: Option<AgentInfo>) {
        let Some(conversation) = self.conversation.as_mut() else {
            warn!("Ignoring ownership change without an active conversation");
            return;
        };

        let previous = conversation.ownership;
        conversation.ownership = new_ownership;
        conversation.touch();
        let conversation_id = conversation.id.clone();
        self.bus
            .publish(StoreEvent::ConversationChanged(self.conversation.clone()));

        if matches!(new_ownership, Ownership::Agent | Ownership::Ai) {
            let narrative = transition_narrative(
                previous,
                new_ownership,
                agent_info.as_ref().map(|a| a.name.as_str()),
            );
            let message = ChatMessage::new(
                conversation_id,
                MessageKind::System,
                narrative,
                Sender::system(),
            );
            self.add_message(message);
        }
    }

    /// Back to initial empty values: no conversation, no messages, surface
    /// closed, zero unread, disconnected.
    pub fn reset(&mut self) {
        self.conversation = None;
        self.messages.clear();
        self.is_open = false;
        self.unread_count = 0;
        self.typing = TypingState::idle();
        self.connection_status = ConnectionStatus::Disconnected;
        self.bus.publish(StoreEvent::StoreReset);
    }

    /// Serialize boundary toward the storage collaborator.
    pub fn persistable(&self) -> Option<PersistedState> {
        self.conversation.as_ref().map(|conversation| PersistedState {
            conversation: conversation.clone(),
            messages: self.messages.clone(),
        })
    }

    /// Deserialize boundary: restore the durable subset, leaving the
    /// session-only fields untouched.
    pub fn hydrate(&mut self, state: PersistedState) {
        self.conversation = Some(state.conversation);
        self.messages = state.messages;
        self.bus
            .publish(StoreEvent::ConversationChanged(self.conversation.clone()));
    }
}

/// Cloneable handle to the process-wide store. Locks are scoped so they are
/// never held across an await.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<ChatStore>>,
}

impl SharedStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChatStore::new(bus))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ChatStore) -> R) -> R {
        let mut store = self.inner.lock().unwrap();
        f(&mut store)
    }

    /// Id of the active conversation, if any. Delayed callbacks use this to
    /// re-check they still target the live conversation before mutating.
    pub fn active_conversation_id(&self) -> Option<String> {
        self.with(|s| s.conversation().map(|c| c.id.clone()))
    }

    pub fn persistable(&self) -> Option<PersistedState> {
        self.with(|s| s.persistable())
    }
}
