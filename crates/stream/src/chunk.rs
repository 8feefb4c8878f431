use ragchat_store::{MessageId, Role};
use serde::{Deserialize, Serialize};

/// One increment of an in-progress assistant reply.
///
/// A well-formed stream carries at most one `Start`, any number of `Token`s, then exactly one
/// terminal `End` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StreamChunk {
    Start { message_id: MessageId },
    Token { content: String, message_id: MessageId },
    End { message_id: MessageId },
    Error { error: String },
}

impl StreamChunk {
    pub fn start(message_id: impl Into<MessageId>) -> Self {
        Self::Start {
            message_id: message_id.into(),
        }
    }

    pub fn token(message_id: impl Into<MessageId>, content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
            message_id: message_id.into(),
        }
    }

    pub fn end(message_id: impl Into<MessageId>) -> Self {
        Self::End {
            message_id: message_id.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Token { .. } => "token",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }
}

/// Payload posted when a user message opens a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    pub role: Role,
}

impl OutgoingMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::User,
        }
    }
}
