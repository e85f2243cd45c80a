//! Wire protocol shared with the conversational backend. Frames are JSON
//! objects tagged by event name: `{"event": "...", "data": {...}}`.

use crate::conversation::{AgentInfo, Conversation, ConversationStatus, Ownership, UserRole};
use crate::message::{ChatMessage, MessageKind, QuickReply, Sender, SenderRole};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Client -> backend events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    StartConversation {
        user_id: String,
        user_role: UserRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    ResumeConversation {
        conversation_id: String,
        user_id: String,
    },
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    CloseConversation {
        conversation_id: String,
    },
    TypingStart {
        conversation_id: String,
    },
    TypingStop {
        conversation_id: String,
    },
    Heartbeat {
        /// Epoch milliseconds at send time.
        timestamp: i64,
    },
}

/// Backend -> client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageReceived(RawMessage),
    ConversationStarted(RawConversation),
    ConversationResumed {
        #[serde(flatten)]
        conversation: RawConversation,
        #[serde(default)]
        messages: Vec<RawMessage>,
    },
    OwnershipChanged {
        #[serde(default)]
        previous_owner: Option<Ownership>,
        new_owner: Ownership,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        agent_info: Option<AgentInfo>,
    },
    TypingIndicator {
        is_typing: bool,
        #[serde(default)]
        typing_user: Option<RawSender>,
    },
    ConversationClosed {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

/// A message as the backend sends it. Every field the client needs may be
/// missing; mapping fills safe defaults and never fails.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub content: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub sender: Option<RawSender>,
    #[serde(default)]
    pub quick_replies: Option<Vec<RawQuickReply>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawSender {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<SenderRole>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawQuickReply {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub style: Option<crate::message::QuickReplyStyle>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawConversation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<UserRole>,
    #[serde(default)]
    pub ownership: Option<Ownership>,
    #[serde(default)]
    pub status: Option<ConversationStatus>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

fn epoch_ms(ts: Option<i64>) -> DateTime<Utc> {
    ts.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

pub fn map_sender(raw: Option<RawSender>) -> Sender {
    let raw = raw.unwrap_or_default();
    Sender {
        id: raw.id.unwrap_or_else(|| "unknown".to_string()),
        name: raw.name.unwrap_or_else(|| "Ridewire".to_string()),
        role: raw.role.unwrap_or(SenderRole::Bot),
    }
}

pub fn map_quick_replies(raw: Option<Vec<RawQuickReply>>) -> Vec<QuickReply> {
    raw.unwrap_or_default()
        .into_iter()
        .map(|qr| QuickReply {
            id: qr.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            label: qr.label.unwrap_or_default(),
            value: qr.value.unwrap_or_default(),
            style: qr.style.unwrap_or_default(),
            icon: qr.icon,
        })
        .collect()
}

/// Defensive wire-to-model mapping. Fills every missing field with a safe
/// default; never fails.
pub fn map_inbound(raw: RawMessage) -> ChatMessage {
    ChatMessage {
        id: raw.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        conversation_id: raw.conversation_id.unwrap_or_default(),
        kind: raw.kind.unwrap_or(MessageKind::Bot),
        content: raw.content.unwrap_or_default(),
        timestamp: epoch_ms(raw.timestamp),
        sender: map_sender(raw.sender),
        quick_replies: map_quick_replies(raw.quick_replies),
        metadata: raw.metadata.unwrap_or_default(),
    }
}

pub fn map_conversation(raw: RawConversation) -> Conversation {
    Conversation {
        id: raw.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id: raw.user_id.unwrap_or_default(),
        user_role: raw.user_role.unwrap_or(UserRole::Rider),
        ownership: raw.ownership.unwrap_or(Ownership::Ai),
        status: raw.status.unwrap_or(ConversationStatus::Active),
        created_at: epoch_ms(raw.created_at),
        updated_at: epoch_ms(raw.updated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn client_events_serialize_with_event_tag() {
        let event = ClientEvent::SendMessage {
            conversation_id: "c1".to_string(),
            content: "hello".to_string(),
            metadata: None,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "send_message");
        assert_eq!(json["data"]["conversation_id"], "c1");
        assert_eq!(json["data"]["content"], "hello");
    }

    #[test]
    fn server_events_deserialize_from_tagged_json() {
        let json = r#"{
            "event": "ownership_changed",
            "data": {"previous_owner": "AI", "new_owner": "AGENT",
                     "agent_info": {"id": "a1", "name": "Sarah"}}
        }"#;
        let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
        match event {
            ServerEvent::OwnershipChanged {
                previous_owner,
                new_owner,
                agent_info,
                ..
            } => {
                assert_eq!(previous_owner, Some(Ownership::Ai));
                assert_eq!(new_owner, Ownership::Agent);
                assert_eq!(agent_info.map(|a| a.name), Some("Sarah".to_string()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn map_inbound_fills_defaults_for_empty_payload() {
        let msg = map_inbound(RawMessage::default());
        assert!(!msg.id.is_empty());
        assert_eq!(msg.kind, MessageKind::Bot);
        assert_eq!(msg.content, "");
        assert_eq!(msg.sender.role, SenderRole::Bot);
        assert!(msg.quick_replies.is_empty());
    }

    #[test]
    fn map_inbound_preserves_populated_fields() {
        let raw = RawMessage {
            id: Some("m1".to_string()),
            conversation_id: Some("c1".to_string()),
            kind: Some(MessageKind::Agent),
            content: Some("On my way".to_string()),
            timestamp: Some(1_700_000_000_000),
            sender: Some(RawSender {
                id: Some("a1".to_string()),
                name: Some("Sarah".to_string()),
                role: Some(SenderRole::Agent),
            }),
            quick_replies: None,
            metadata: None,
        };
        let msg = map_inbound(raw);
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.conversation_id, "c1");
        assert_eq!(msg.kind, MessageKind::Agent);
        assert_eq!(msg.sender.name, "Sarah");
        assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn quick_reply_mapping_tolerates_missing_fields() {
        let replies = map_quick_replies(Some(vec![RawQuickReply {
            label: Some("Book a ride".to_string()),
            value: Some("book_ride".to_string()),
            ..Default::default()
        }]));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].label, "Book a ride");
        assert!(!replies[0].id.is_empty());
    }
}
