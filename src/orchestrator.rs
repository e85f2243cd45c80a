//! The coordinator: wires transport events into store mutations, starts and
//! resumes conversations, persists conversation identity across restarts,
//! and routes outgoing sends through the transport or the fallback
//! simulator depending on connectivity. The only component aware of both.

use crate::analytics::AnalyticsSink;
use crate::config::ChatConfig;
use crate::conversation::UserRole;
use crate::error::ChatError;
use crate::message::{ChatMessage, MessageKind, Sender, SenderRole, TypingState};
use crate::protocol::{map_conversation, map_inbound, map_sender, ClientEvent, ServerEvent};
use crate::simulator::FallbackSimulator;
use crate::storage::{persist_snapshot, ConversationStorage};
use crate::store::SharedStore;
use crate::transport::{ConnectionStatus, Transport, TransportEvent};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ChatOrchestrator {
    config: ChatConfig,
    transport: Arc<dyn Transport>,
    store: SharedStore,
    storage: Arc<dyn ConversationStorage>,
    analytics: Arc<dyn AnalyticsSink>,
    simulator: tokio::sync::OnceCell<Arc<FallbackSimulator>>,
    initialized: Mutex<bool>,
    // True when the backend was unreachable at initialize time and the
    // simulator is standing in for it.
    fallback: Arc<AtomicBool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatOrchestrator {
    pub fn new(
        config: ChatConfig,
        transport: Arc<dyn Transport>,
        store: SharedStore,
        storage: Arc<dyn ConversationStorage>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            storage,
            analytics,
            simulator: tokio::sync::OnceCell::new(),
            initialized: Mutex::new(false),
            fallback: Arc::new(AtomicBool::new(false)),
            event_task: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn track(&self, event: &str, properties: Value) {
        if self.config.analytics_enabled {
            self.analytics.track(event, properties);
        }
    }

    /// Construct the simulator on first use; a real backend never pays its
    /// initialization cost.
    async fn simulator(&self) -> &Arc<FallbackSimulator> {
        self.simulator
            .get_or_init(|| async {
                debug!("Initializing fallback simulator");
                Arc::new(FallbackSimulator::new(
                    self.store.clone(),
                    self.storage.clone(),
                ))
            })
            .await
    }

    /// Connect to the backend and start routing its events into the store.
    /// Idempotent: a second call logs and no-ops. When the backend is
    /// unreachable the store is forced to `Connected` so the UI never shows
    /// an offline banner while the simulator is answering.
    pub async fn initialize(&self, credential: Option<String>) {
        {
            let mut initialized = self.initialized.lock().unwrap();
            if *initialized {
                info!("Chat orchestrator already initialized");
                return;
            }
            *initialized = true;
        }

        // Subscribe before connecting so the first status change is seen.
        let rx = self.transport.subscribe();
        let ctx = EventContext {
            store: self.store.clone(),
            storage: self.storage.clone(),
            analytics: self.analytics.clone(),
            analytics_enabled: self.config.analytics_enabled,
            fallback: self.fallback.clone(),
        };
        let task = tokio::spawn(run_event_loop(rx, ctx));
        *self.event_task.lock().unwrap() = Some(task);

        match self.transport.connect(credential).await {
            Ok(()) => {
                self.fallback.store(false, Ordering::SeqCst);
                info!("Chat orchestrator connected");
            }
            Err(e) => {
                warn!("Chat backend unreachable, entering fallback mode: {}", e);
                self.fallback.store(true, Ordering::SeqCst);
                self.track("chat_fallback_engaged", json!({}));
                self.store
                    .with(|s| s.set_connection_status(ConnectionStatus::Connected));
            }
        }
    }

    /// Open a new conversation. Delegates entirely to the simulator when the
    /// transport is down; otherwise the started event populates the store
    /// asynchronously (fire-and-await-event, no synchronous result).
    pub async fn start_conversation(
        &self,
        user_id: &str,
        role: UserRole,
        context: Option<Value>,
    ) {
        self.track(
            "chat_conversation_start_requested",
            json!({ "role": role.to_string() }),
        );
        if self.transport.status() != ConnectionStatus::Connected {
            info!("Transport not connected, starting simulated conversation");
            self.simulator().await.start_conversation(user_id, role).await;
            return;
        }
        self.transport
            .emit(ClientEvent::StartConversation {
                user_id: user_id.to_string(),
                user_role: role,
                context,
            })
            .await;
    }

    /// Resume a known conversation against the backend. There is no fallback
    /// resume: a simulated conversation cannot be resumed against a real id.
    pub async fn resume_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), ChatError> {
        if self.transport.status() != ConnectionStatus::Connected {
            return Err(ChatError::connection_failed(
                "Cannot resume a conversation while disconnected",
            ));
        }
        self.transport
            .emit(ClientEvent::ResumeConversation {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await;
        self.track("chat_conversation_resume_requested", json!({}));
        Ok(())
    }

    /// Resume the persisted conversation if one exists for this user.
    /// Returns whether an attempt was made; success lands asynchronously via
    /// the resumed event.
    pub async fn try_resume_from_storage(&self, user_id: &str) -> bool {
        let state = match self.storage.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not read persisted conversation: {:#}", e);
                return false;
            }
        };
        let Some(state) = state else {
            return false;
        };
        if state.conversation.user_id != user_id {
            debug!("Persisted conversation belongs to a different user, ignoring");
            return false;
        }
        match self
            .resume_conversation(&state.conversation.id, user_id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Resume attempt not possible: {}", e);
                false
            }
        }
    }

    /// Send a user message. Appends one optimistic message with a temporary
    /// id in both live and fallback modes, so behavior is visually
    /// identical; the backend does not echo the sender's own message back.
    pub async fn send_message(
        &self,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<(), ChatError> {
        let length = content.chars().count();
        if length < self.config.message.min_length {
            return Err(ChatError::invalid_message("Message is empty"));
        }
        if length > self.config.message.max_length {
            return Err(ChatError::invalid_message(format!(
                "Message exceeds {} characters",
                self.config.message.max_length
            )));
        }

        let conversation = self
            .store
            .with(|s| s.conversation().cloned())
            .ok_or_else(ChatError::conversation_not_found)?;

        let sender = Sender::new(
            conversation.user_id.clone(),
            "You",
            SenderRole::from(conversation.user_role),
        );
        let optimistic = ChatMessage::optimistic(&conversation.id, content, sender);
        self.store.with(|s| s.add_message(optimistic));
        persist_snapshot(&self.store, self.storage.as_ref()).await;

        let connected = self.transport.status() == ConnectionStatus::Connected;
        self.track(
            "chat_message_sent",
            json!({ "mode": if connected { "live" } else { "fallback" } }),
        );

        if connected {
            self.transport
                .emit(ClientEvent::SendMessage {
                    conversation_id: conversation.id,
                    content: content.to_string(),
                    metadata,
                })
                .await;
        } else {
            self.simulator().await.handle_user_message(content).await;
        }
        Ok(())
    }

    /// Best-effort close notification, then immediate local teardown; local
    /// state does not wait for the server to acknowledge closure.
    pub async fn close_conversation(&self) {
        let Some(conversation_id) = self.store.active_conversation_id() else {
            debug!("No active conversation to close");
            return;
        };
        if self.transport.status() == ConnectionStatus::Connected {
            self.transport
                .emit(ClientEvent::CloseConversation {
                    conversation_id: conversation_id.clone(),
                })
                .await;
        }
        if let Err(e) = self.storage.clear().await {
            warn!("Failed to clear persisted conversation: {:#}", e);
        }
        self.store.with(|s| s.reset());
        self.track("chat_conversation_closed", json!({}));
        info!("Conversation {} closed", conversation_id);
    }

    /// Forward the composer's typing state to the backend. Silently skipped
    /// when disconnected; the simulator has no use for it.
    pub async fn notify_typing(&self, is_typing: bool) {
        let Some(conversation_id) = self.store.active_conversation_id() else {
            return;
        };
        if self.transport.status() != ConnectionStatus::Connected {
            return;
        }
        let event = if is_typing {
            ClientEvent::TypingStart { conversation_id }
        } else {
            ClientEvent::TypingStop { conversation_id }
        };
        self.transport.emit(event).await;
    }

    /// Open or close the chat surface. Opening marks everything as read.
    pub fn set_surface_open(&self, open: bool) {
        self.store.with(|s| s.set_is_open(open));
    }

    /// Tear the transport down. A later `initialize` is effective again.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
        self.fallback.store(false, Ordering::SeqCst);
        *self.initialized.lock().unwrap() = false;
        info!("Chat orchestrator disconnected");
    }
}

struct EventContext {
    store: SharedStore,
    storage: Arc<dyn ConversationStorage>,
    analytics: Arc<dyn AnalyticsSink>,
    analytics_enabled: bool,
    fallback: Arc<AtomicBool>,
}

impl EventContext {
    fn track(&self, event: &str, properties: Value) {
        if self.analytics_enabled {
            self.analytics.track(event, properties);
        }
    }
}

async fn run_event_loop(mut rx: broadcast::Receiver<TransportEvent>, ctx: EventContext) {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::StatusChanged(status)) => {
                // In fallback mode the store stays "connected"; the simulator
                // is answering and an offline banner would be wrong.
                if ctx.fallback.load(Ordering::SeqCst) && status != ConnectionStatus::Connected {
                    debug!("Fallback mode, not mirroring status {:?}", status);
                    continue;
                }
                ctx.store.with(|s| s.set_connection_status(status));
            }
            Ok(TransportEvent::Inbound(event)) => handle_server_event(&ctx, event).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event loop lagged, {} transport events dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Transport event stream closed");
                return;
            }
        }
    }
}

/// All inbound protocol events land here and become store mutations. This
/// path never returns an error; protocol failures are rendered into the
/// conversation log instead.
async fn handle_server_event(ctx: &EventContext, event: ServerEvent) {
    match event {
        ServerEvent::MessageReceived(raw) => {
            let message = map_inbound(raw);
            ctx.store.with(|s| s.add_message(message));
            persist_snapshot(&ctx.store, ctx.storage.as_ref()).await;
        }
        ServerEvent::ConversationStarted(raw) => {
            let conversation = map_conversation(raw);
            info!("Conversation {} started", conversation.id);
            ctx.store.with(|s| s.set_conversation(Some(conversation)));
            persist_snapshot(&ctx.store, ctx.storage.as_ref()).await;
            ctx.track("chat_conversation_started", json!({}));
        }
        ServerEvent::ConversationResumed {
            conversation,
            messages,
        } => {
            let conversation = map_conversation(conversation);
            info!("Conversation {} resumed", conversation.id);
            ctx.store.with(|s| {
                s.set_conversation(Some(conversation));
                if !messages.is_empty() {
                    s.set_messages(messages.into_iter().map(map_inbound).collect());
                }
            });
            persist_snapshot(&ctx.store, ctx.storage.as_ref()).await;
            ctx.track("chat_conversation_resumed", json!({}));
        }
        ServerEvent::OwnershipChanged {
            new_owner,
            agent_info,
            reason,
            ..
        } => {
            debug!("Ownership -> {} ({:?})", new_owner, reason);
            ctx.store.with(|s| s.update_ownership(new_owner, agent_info));
            persist_snapshot(&ctx.store, ctx.storage.as_ref()).await;
            ctx.track(
                "chat_ownership_changed",
                json!({ "new_owner": new_owner.to_string() }),
            );
        }
        ServerEvent::TypingIndicator {
            is_typing,
            typing_user,
        } => {
            let typing = if is_typing {
                TypingState::typing(map_sender(typing_user))
            } else {
                TypingState::idle()
            };
            ctx.store.with(|s| s.set_typing(typing));
        }
        ServerEvent::ConversationClosed { conversation_id } => {
            info!("Conversation closed by server ({:?})", conversation_id);
            if let Err(e) = ctx.storage.clear().await {
                warn!("Failed to clear persisted conversation: {:#}", e);
            }
            ctx.store.with(|s| s.reset());
            ctx.track("chat_conversation_closed_by_server", json!({}));
        }
        ServerEvent::Error { code, message } => {
            let error = ChatError::from_wire(&code, &message);
            warn!("Protocol error: {}", error);
            let Some(conversation_id) = ctx.store.active_conversation_id() else {
                return;
            };
            let rendered = ChatMessage::new(
                conversation_id,
                MessageKind::Error,
                error.message.clone(),
                Sender::system(),
            );
            ctx.store.with(|s| s.add_message(rendered));
        }
    }
}
