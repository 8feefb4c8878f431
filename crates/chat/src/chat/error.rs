use ragchat_store::{SessionId, StoreError};
use snafu::Snafu;

use super::phase::StreamTarget;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("message content is empty"))]
    EmptyContent { stage: &'static str },
    #[snafu(display("session id is empty"))]
    EmptySessionId { stage: &'static str },
    #[snafu(display("no session is active"))]
    NoActiveSession { stage: &'static str },
    #[snafu(display("session '{requested}' is not the active session"))]
    SessionNotActive {
        stage: &'static str,
        requested: SessionId,
        active: Option<SessionId>,
    },
    #[snafu(display("stream {active} is still in flight"))]
    StreamInFlight {
        stage: &'static str,
        active: StreamTarget,
    },
    #[snafu(display("session store failed on `{stage}`, {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
}

impl ChatError {
    /// True for refusals that left every piece of state untouched.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Store { .. })
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
