use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MessageId, SessionId};

/// Title given to sessions created with a blank title.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry. Persisted messages carry server-assigned ids; an optimistic
/// user message carries a transient id until reconciliation replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            role,
            timestamp,
        }
    }

    /// Creates the locally-shown user message for a send that the server has not confirmed.
    pub fn optimistic_user(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(
            MessageId::transient(now.timestamp_millis()),
            Role::User,
            content,
            now,
        )
    }

    pub fn is_transient(&self) -> bool {
        self.id.is_transient()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut title = title.into();
        if title.trim().is_empty() {
            title = DEFAULT_SESSION_TITLE.to_string();
        }

        Self {
            id: id.into(),
            title,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Orders sessions most recently updated first, the order the session list is shown in.
pub fn sort_sessions_by_recent(sessions: &mut [Session]) {
    sessions.sort_by(|left, right| {
        right
            .updated_at
            .cmp(&left.updated_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn message_wire_format_uses_lowercase_roles_and_iso_timestamps() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let message = Message::new("m1", Role::Assistant, "Hi there", timestamp);

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["id"], "m1");
        assert_eq!(json["timestamp"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn session_deserializes_camel_case_payload() {
        let session: Session = serde_json::from_str(
            r#"{"id":"s1","title":"Pricing","createdAt":"2024-05-01T10:00:00.000Z","updatedAt":"2024-05-02T10:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(session.id.as_str(), "s1");
        assert!(session.updated_at > session.created_at);
    }

    #[test]
    fn blank_titles_fall_back_to_default() {
        let session = Session::new("s1", "  ", Utc::now());
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn optimistic_messages_are_transient_user_messages() {
        let message = Message::optimistic_user("Hello", Utc::now());
        assert!(message.is_transient());
        assert_eq!(message.role, Role::User);
    }
}
