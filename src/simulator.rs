//! Scripted conversational partner used when no backend is reachable. It
//! writes to the store in exactly the shape the transport's inbound mapper
//! would have produced, so the UI cannot tell live and simulated traffic
//! apart. It never touches the transport.

use crate::conversation::{AgentInfo, Conversation, Ownership, UserRole};
use crate::message::{ChatMessage, MessageKind, QuickReply, Sender, SenderRole, TypingState};
use crate::storage::{persist_snapshot, ConversationStorage};
use crate::store::SharedStore;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

const WELCOME_DELAY: Duration = Duration::from_millis(600);
const ESCALATION_DELAY: Duration = Duration::from_millis(1500);
const AGENT_GREETING_DELAY: Duration = Duration::from_millis(1200);

/// User turns on a help/support topic before the script hands off to a
/// (simulated) human agent.
const ESCALATION_THRESHOLD: u32 = 3;

const SIM_AGENT_ID: &str = "agent-sim";
const SIM_AGENT_NAME: &str = "Maya";

const GENERIC_REPLIES: [&str; 4] = [
    "Got it! Is there anything else I can help you with?",
    "Thanks for letting me know. What else can I do for you?",
    "Understood. Feel free to ask me anything about your Ridewire account.",
    "Okay! I'm here if you need anything else.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptTopic {
    Booking,
    Tracking,
    Cancellation,
    Earnings,
    Help,
    AgentRequest,
    Generic,
}

/// First match wins, in fixed priority order; matching is case-insensitive
/// substring search.
fn match_topic(content: &str) -> ScriptTopic {
    let text = content.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if contains_any(&["book", "reserve"]) {
        ScriptTopic::Booking
    } else if contains_any(&["track", "where is", "eta"]) {
        ScriptTopic::Tracking
    } else if contains_any(&["cancel", "refund"]) {
        ScriptTopic::Cancellation
    } else if contains_any(&["earning", "payout"]) {
        ScriptTopic::Earnings
    } else if contains_any(&["help", "support", "problem", "issue"]) {
        ScriptTopic::Help
    } else if contains_any(&["agent", "human", "representative", "real person"]) {
        ScriptTopic::AgentRequest
    } else {
        ScriptTopic::Generic
    }
}

fn scripted_reply(topic: ScriptTopic, role: UserRole, turn: u32) -> String {
    match topic {
        ScriptTopic::Booking => {
            "I can help with that! Open the Book tab, set your pickup and destination, \
             and you'll see fares for every ride class before you confirm."
                .to_string()
        }
        ScriptTopic::Tracking => {
            "You can follow your ride in real time from the trip screen. Your driver's \
             position and ETA update every few seconds."
                .to_string()
        }
        ScriptTopic::Cancellation => {
            "You can cancel from the trip screen. Cancelling within 2 minutes of booking \
             is always free; after that a small fee may apply."
                .to_string()
        }
        ScriptTopic::Earnings => match role {
            UserRole::Driver => {
                "Your earnings dashboard shows today's trips, tips and incentives. \
                 Payouts land every Tuesday, or instantly with Express Pay."
                    .to_string()
            }
            UserRole::Rider => {
                "Looking for payment details? You can review receipts and payment \
                 methods under Wallet in your profile."
                    .to_string()
            }
        },
        ScriptTopic::Help => {
            "I'm sorry you're running into trouble. Tell me a bit more and I'll do my \
             best — or I can bring in a member of our support team."
                .to_string()
        }
        ScriptTopic::AgentRequest => {
            "Of course — let me connect you with a member of our support team.".to_string()
        }
        ScriptTopic::Generic => {
            GENERIC_REPLIES[(turn as usize) % GENERIC_REPLIES.len()].to_string()
        }
    }
}

fn welcome_message(conversation_id: &str, role: UserRole) -> ChatMessage {
    let (content, quick_replies) = match role {
        UserRole::Rider => (
            "Hi! I'm the Ridewire Assistant. I can help you book a ride, track a trip, \
             or sort out anything on your account. What can I do for you?",
            vec![
                QuickReply::new("book_ride", "Book a ride", "I want to book a ride"),
                QuickReply::new("track_ride", "Track my ride", "Where is my ride?"),
                QuickReply::new("help", "Something else", "I need help with something else"),
            ],
        ),
        UserRole::Driver => (
            "Hi! I'm the Ridewire Assistant. I can help with your earnings, trip \
             history, or anything else about driving with us.",
            vec![
                QuickReply::new("earnings", "My earnings", "Show me my earnings"),
                QuickReply::new("trip_history", "Trip history", "Show my trip history"),
                QuickReply::new("help", "Something else", "I need help with something else"),
            ],
        ),
    };
    ChatMessage::new(conversation_id, MessageKind::Bot, content, Sender::bot())
        .with_quick_replies(quick_replies)
}

pub struct FallbackSimulator {
    store: SharedStore,
    storage: Arc<dyn ConversationStorage>,
    user_turns: AtomicU32,
}

impl FallbackSimulator {
    pub fn new(store: SharedStore, storage: Arc<dyn ConversationStorage>) -> Self {
        Self {
            store,
            storage,
            user_turns: AtomicU32::new(0),
        }
    }

    /// Synthesize a local conversation and greet after a short delay.
    pub async fn start_conversation(&self, user_id: &str, role: UserRole) {
        let conversation = Conversation::new(format!("local-{}", Uuid::new_v4()), user_id, role);
        let conversation_id = conversation.id.clone();
        debug!("Starting simulated conversation {}", conversation_id);

        self.user_turns.store(0, Ordering::SeqCst);
        self.store.with(|s| s.set_conversation(Some(conversation)));
        persist_snapshot(&self.store, self.storage.as_ref()).await;

        let store = self.store.clone();
        let storage = self.storage.clone();
        tokio::spawn(async move {
            sleep(WELCOME_DELAY).await;
            // The conversation may have been closed while we slept.
            if store.active_conversation_id().as_deref() != Some(conversation_id.as_str()) {
                return;
            }
            store.with(|s| s.add_message(welcome_message(&conversation_id, role)));
            persist_snapshot(&store, storage.as_ref()).await;
        });
    }

    /// Answer a user message after a simulated typing delay, escalating to a
    /// simulated human agent when the script calls for it.
    pub async fn handle_user_message(&self, content: &str) {
        let Some(conversation_id) = self.store.active_conversation_id() else {
            warn!("Simulator received a message without an active conversation");
            return;
        };
        let (role, ownership) = self.store.with(|s| {
            s.conversation()
                .map(|c| (c.user_role, c.ownership))
                .unwrap_or((UserRole::Rider, Ownership::Ai))
        });

        let turn = self.user_turns.fetch_add(1, Ordering::SeqCst) + 1;
        let topic = match_topic(content);
        let escalate = ownership != Ownership::Agent
            && (topic == ScriptTopic::AgentRequest
                || (topic == ScriptTopic::Help && turn >= ESCALATION_THRESHOLD));
        let reply = scripted_reply(topic, role, turn);
        let typing_delay = Duration::from_millis(rand::thread_rng().gen_range(900..=1800));
        debug!(
            "Simulated reply for turn {} (topic {:?}, escalate: {})",
            turn, topic, escalate
        );

        let store = self.store.clone();
        let storage = self.storage.clone();
        tokio::spawn(async move {
            // The conversation may already be gone by the time this task
            // first runs; don't flag typing on a dead conversation.
            if store.active_conversation_id().as_deref() != Some(conversation_id.as_str()) {
                return;
            }
            store.with(|s| s.set_typing(TypingState::typing(Sender::bot())));
            sleep(typing_delay).await;
            if store.active_conversation_id().as_deref() != Some(conversation_id.as_str()) {
                store.with(|s| s.set_typing(TypingState::idle()));
                return;
            }
            store.with(|s| {
                s.set_typing(TypingState::idle());
                s.add_message(ChatMessage::new(
                    &conversation_id,
                    MessageKind::Bot,
                    reply,
                    Sender::bot(),
                ));
            });
            persist_snapshot(&store, storage.as_ref()).await;

            if !escalate {
                return;
            }

            // Hand-off latency is asynchronous in the real system; model it.
            sleep(ESCALATION_DELAY).await;
            if store.active_conversation_id().as_deref() != Some(conversation_id.as_str()) {
                return;
            }
            store.with(|s| {
                s.update_ownership(
                    Ownership::Agent,
                    Some(AgentInfo {
                        id: SIM_AGENT_ID.to_string(),
                        name: SIM_AGENT_NAME.to_string(),
                    }),
                )
            });
            persist_snapshot(&store, storage.as_ref()).await;

            sleep(AGENT_GREETING_DELAY).await;
            if store.active_conversation_id().as_deref() != Some(conversation_id.as_str()) {
                return;
            }
            store.with(|s| {
                s.add_message(ChatMessage::new(
                    &conversation_id,
                    MessageKind::Agent,
                    format!(
                        "Hi, I'm {}. I've read the conversation so far — let's get this \
                         sorted for you.",
                        SIM_AGENT_NAME
                    ),
                    Sender::new(SIM_AGENT_ID, SIM_AGENT_NAME, SenderRole::Agent),
                ));
            });
            persist_snapshot(&store, storage.as_ref()).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::storage::testing::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn simulator() -> (FallbackSimulator, SharedStore) {
        let store = SharedStore::new(Arc::new(EventBus::new()));
        let storage: Arc<dyn ConversationStorage> = Arc::new(MemoryStorage::new());
        (FallbackSimulator::new(store.clone(), storage), store)
    }

    async fn flush_timers() {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    #[test]
    fn cascade_matches_in_priority_order() {
        assert_eq!(match_topic("I want to BOOK a ride"), ScriptTopic::Booking);
        assert_eq!(match_topic("where is my driver?"), ScriptTopic::Tracking);
        assert_eq!(match_topic("please cancel it"), ScriptTopic::Cancellation);
        assert_eq!(match_topic("when is my payout?"), ScriptTopic::Earnings);
        assert_eq!(match_topic("i need help"), ScriptTopic::Help);
        assert_eq!(match_topic("give me a human"), ScriptTopic::AgentRequest);
        assert_eq!(match_topic("thanks"), ScriptTopic::Generic);
        // A message hitting two topics resolves to the higher-priority one.
        assert_eq!(match_topic("help me book something"), ScriptTopic::Booking);
    }

    #[test]
    fn generic_replies_rotate_deterministically() {
        let a = scripted_reply(ScriptTopic::Generic, UserRole::Rider, 1);
        let b = scripted_reply(ScriptTopic::Generic, UserRole::Rider, 2);
        let again = scripted_reply(ScriptTopic::Generic, UserRole::Rider, 1);
        assert_ne!(a, b);
        assert_eq!(a, again);
    }

    #[tokio::test(start_paused = true)]
    async fn rider_welcome_has_three_quick_replies() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Rider).await;
        flush_timers().await;

        store.with(|s| {
            assert_eq!(s.messages().len(), 1);
            let welcome = &s.messages()[0];
            assert_eq!(welcome.kind, MessageKind::Bot);
            assert!(welcome.content.contains("Ridewire Assistant"));
            let ids: Vec<_> = welcome.quick_replies.iter().map(|q| q.id.clone()).collect();
            assert_eq!(ids, vec!["book_ride", "track_ride", "help"]);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn local_conversation_ids_are_prefixed() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Driver).await;
        let id = store.active_conversation_id().expect("conversation");
        assert!(id.starts_with("local-"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_help_escalates_to_agent() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Rider).await;
        flush_timers().await;

        for _ in 0..3 {
            sim.handle_user_message("I still need help").await;
            flush_timers().await;
        }

        store.with(|s| {
            assert_eq!(s.conversation().unwrap().ownership, Ownership::Agent);
            let kinds: Vec<_> = s.messages().iter().map(|m| m.kind).collect();
            let system_at = kinds
                .iter()
                .position(|k| *k == MessageKind::System)
                .expect("hand-off narrative");
            let agent_at = kinds
                .iter()
                .position(|k| *k == MessageKind::Agent)
                .expect("agent greeting");
            assert!(system_at < agent_at);
            assert!(s.messages()[system_at].content.contains(SIM_AGENT_NAME));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_human_request_escalates_immediately() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Rider).await;
        flush_timers().await;

        sim.handle_user_message("let me talk to a human").await;
        flush_timers().await;

        store.with(|s| {
            assert_eq!(s.conversation().unwrap().ownership, Ownership::Agent);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timers_do_not_resurrect_a_closed_conversation() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Rider).await;
        // Close before the welcome timer fires.
        store.with(|s| s.reset());
        flush_timers().await;

        store.with(|s| {
            assert!(s.conversation().is_none());
            assert!(s.messages().is_empty());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn reset_before_reply_leaves_no_typing_indicator() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Rider).await;
        flush_timers().await;

        // Reset lands between scheduling the reply and its timers firing.
        sim.handle_user_message("thanks").await;
        store.with(|s| s.reset());
        flush_timers().await;

        store.with(|s| {
            assert!(!s.typing().is_typing);
            assert!(s.conversation().is_none());
            assert!(s.messages().is_empty());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_clears_after_reply() {
        let (sim, store) = simulator();
        sim.start_conversation("u1", UserRole::Rider).await;
        flush_timers().await;

        sim.handle_user_message("thanks").await;
        flush_timers().await;

        store.with(|s| {
            assert!(!s.typing().is_typing);
            // Welcome plus one scripted reply.
            assert_eq!(s.messages().len(), 2);
        });
    }
}
