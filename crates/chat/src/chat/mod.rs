//! The streaming chat core: stream phases, the transcript they drive, and the async session
//! that ties a [`ragchat_store::SessionStore`] to a [`ragchat_stream::StreamTransport`].
mod error;
mod phase;
mod session;
mod transcript;

pub use error::{ChatError, ChatResult};
pub use phase::{
    StreamId, StreamPhase, StreamTarget, StreamTransition, TransitionRejection, TransitionResult,
};
pub use session::{
    ChatSnapshot, DEFAULT_CHUNK_TIMEOUT, DEFAULT_OPEN_TIMEOUT, StreamTimeouts,
    StreamingChatSession,
};
pub use transcript::{ChatTranscriptState, ChunkOutcome, Transcript};
