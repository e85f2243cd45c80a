use crate::conversation::UserRole;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Optimistic sends carry a client-generated id with this prefix so the UI
/// can tell them apart from server-confirmed ids.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Messages are grouped under one header when the same sender posts within
/// this window.
const GROUP_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    User,
    Bot,
    Agent,
    System,
    Error,
}

/// The human role enum extended with the non-human parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Rider,
    Driver,
    Bot,
    Agent,
    System,
}

impl From<UserRole> for SenderRole {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Rider => SenderRole::Rider,
            UserRole::Driver => SenderRole::Driver,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
    pub role: SenderRole,
}

impl Sender {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: SenderRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    pub fn bot() -> Self {
        Self::new("bot", "Ridewire Assistant", SenderRole::Bot)
    }

    pub fn system() -> Self {
        Self::new("system", "System", SenderRole::System)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickReplyStyle {
    Primary,
    Secondary,
    Outline,
}

impl Default for QuickReplyStyle {
    fn default() -> Self {
        QuickReplyStyle::Secondary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    pub id: String,
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub style: QuickReplyStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl QuickReply {
    pub fn new(id: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value: value.into(),
            style: QuickReplyStyle::default(),
            icon: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ChatMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
        sender: Sender,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            sender,
            quick_replies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// An optimistic user message with a client-generated temporary id.
    pub fn optimistic(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        sender: Sender,
    ) -> Self {
        let mut msg = Self::new(conversation_id, MessageKind::User, content, sender);
        msg.id = format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4());
        msg
    }

    pub fn with_quick_replies(mut self, quick_replies: Vec<QuickReply>) -> Self {
        self.quick_replies = quick_replies;
        self
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }
}

/// True when two consecutive messages should render under one sender header:
/// same sender id and role, and within the grouping window.
pub fn should_group(a: &ChatMessage, b: &ChatMessage) -> bool {
    a.sender.id == b.sender.id
        && a.sender.role == b.sender.role
        && (b.timestamp - a.timestamp).num_seconds().abs() < GROUP_WINDOW_SECS
}

/// Coarse human-readable age for a timestamp ("just now", "5m ago", ...).
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let delta = Utc::now() - ts;
    let secs = delta.num_seconds();
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", delta.num_minutes())
    } else if secs < 86_400 {
        format!("{}h ago", delta.num_hours())
    } else if delta.num_days() < 7 {
        format!("{}d ago", delta.num_days())
    } else {
        ts.format("%b %e, %Y").to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    pub date: NaiveDate,
    pub messages: Vec<ChatMessage>,
}

/// Partition a message log into calendar-day buckets, preserving insertion
/// order within and across days.
pub fn group_by_calendar_day(messages: &[ChatMessage]) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for msg in messages {
        let date = msg.timestamp.date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(msg.clone()),
            _ => groups.push(DayGroup {
                date,
                messages: vec![msg.clone()],
            }),
        }
    }
    groups
}

/// Who is typing right now. Overwritten wholesale on each update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypingState {
    pub is_typing: bool,
    pub typing_user: Option<Sender>,
}

impl TypingState {
    pub fn typing(user: Sender) -> Self {
        Self {
            is_typing: true,
            typing_user: Some(user),
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn msg_at(sender: Sender, offset_secs: i64) -> ChatMessage {
        let mut m = ChatMessage::new("c1", MessageKind::User, "hello", sender);
        m.timestamp = Utc::now() + Duration::seconds(offset_secs);
        m
    }

    #[test]
    fn groups_same_sender_within_window() {
        let a = msg_at(Sender::new("u1", "Ana", SenderRole::Rider), 0);
        let b = msg_at(Sender::new("u1", "Ana", SenderRole::Rider), 60);
        assert!(should_group(&a, &b));
    }

    #[test]
    fn does_not_group_across_senders_or_window() {
        let a = msg_at(Sender::new("u1", "Ana", SenderRole::Rider), 0);
        let b = msg_at(Sender::new("u2", "Ben", SenderRole::Rider), 30);
        let c = msg_at(Sender::new("u1", "Ana", SenderRole::Rider), 180);
        assert!(!should_group(&a, &b));
        assert!(!should_group(&a, &c));
    }

    #[test]
    fn optimistic_ids_are_distinguishable() {
        let m = ChatMessage::optimistic("c1", "hi", Sender::new("u1", "Ana", SenderRole::Rider));
        assert!(m.is_optimistic());
        assert!(m.id.starts_with(TEMP_ID_PREFIX));
        let n = ChatMessage::new("c1", MessageKind::Bot, "hi", Sender::bot());
        assert!(!n.is_optimistic());
    }

    #[test]
    fn calendar_day_grouping_preserves_order() {
        let sender = Sender::bot();
        let mut yesterday = ChatMessage::new("c1", MessageKind::Bot, "old", sender.clone());
        yesterday.timestamp = Utc::now() - Duration::days(1);
        let today_a = ChatMessage::new("c1", MessageKind::Bot, "a", sender.clone());
        let today_b = ChatMessage::new("c1", MessageKind::Bot, "b", sender);

        let groups = group_by_calendar_day(&[yesterday.clone(), today_a.clone(), today_b.clone()]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].messages, vec![yesterday]);
        assert_eq!(groups[1].messages, vec![today_a, today_b]);
    }

    #[test]
    fn relative_time_buckets() {
        assert_eq!(format_relative_time(Utc::now()), "just now");
        assert_eq!(
            format_relative_time(Utc::now() - Duration::minutes(5)),
            "5m ago"
        );
        assert_eq!(
            format_relative_time(Utc::now() - Duration::hours(3)),
            "3h ago"
        );
        assert_eq!(
            format_relative_time(Utc::now() - Duration::days(2)),
            "2d ago"
        );
    }
}
