use chrono::{DateTime, Utc};
use ragchat_store::{Message, MessageId, SessionId, StoreError};
use ragchat_stream::StreamChunk;
use snafu::ensure;

use super::error::{
    ChatResult, EmptyContentSnafu, EmptySessionIdSnafu, SessionNotActiveSnafu,
    StreamInFlightSnafu,
};
use super::phase::{StreamId, StreamPhase, StreamTarget, StreamTransition};

/// What the transcript view renders. Rebuilt from history plus in-flight stream state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatTranscriptState {
    pub messages: Vec<Message>,
    pub streaming_message_id: Option<MessageId>,
    pub streaming_content: String,
    pub is_streaming: bool,
}

/// Result of applying one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk belonged to a stream that is no longer current and was dropped.
    Stale,
    Continue,
    /// Terminal `end`; the transcript now waits for reconciliation.
    Ended,
    /// Terminal `error`; partial text was discarded.
    Failed,
}

/// Synchronous owner of the active session's transcript and stream phase.
///
/// Every mutation the chat core performs goes through here, so each step of a send can be
/// driven and asserted without a runtime.
#[derive(Debug, Default)]
pub struct Transcript {
    session_id: Option<SessionId>,
    state: ChatTranscriptState,
    phase: StreamPhase,
    pending_message_id: Option<MessageId>,
    next_stream_id: u64,
    view_generation: u64,
    last_error: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn state(&self) -> &ChatTranscriptState {
        &self.state
    }

    pub fn phase(&self) -> &StreamPhase {
        &self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True while `target` is the stream this transcript is following.
    pub fn is_current(&self, target: &StreamTarget) -> bool {
        self.phase.target() == Some(target)
    }

    /// Appends the optimistic user message and opens a new stream target.
    ///
    /// Refusals leave the transcript untouched.
    pub fn begin_send(
        &mut self,
        session_id: &SessionId,
        content: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<StreamTarget> {
        ensure!(
            !session_id.is_empty(),
            EmptySessionIdSnafu {
                stage: "begin-send"
            }
        );
        let content = content.trim();
        ensure!(
            !content.is_empty(),
            EmptyContentSnafu {
                stage: "begin-send"
            }
        );
        ensure!(
            self.session_id.as_ref() == Some(session_id),
            SessionNotActiveSnafu {
                stage: "begin-send",
                requested: session_id.clone(),
                active: self.session_id.clone(),
            }
        );
        if let Some(active) = self.phase.target().filter(|_| self.phase.blocks_send()) {
            return StreamInFlightSnafu {
                stage: "begin-send",
                active: active.clone(),
            }
            .fail();
        }

        self.next_stream_id = self.next_stream_id.saturating_add(1);
        let target = StreamTarget::new(session_id.clone(), StreamId::new(self.next_stream_id));
        self.transition(StreamTransition::Open(target.clone()));

        // A failed send leaves its optimistic message behind; never reuse its id.
        let mut message = Message::optimistic_user(content, now);
        let mut unix_millis = now.timestamp_millis();
        while self
            .state
            .messages
            .iter()
            .any(|existing| existing.id == message.id)
        {
            unix_millis = unix_millis.saturating_add(1);
            message.id = MessageId::transient(unix_millis);
        }

        tracing::debug!(stream = %target, message_id = %message.id, "appended optimistic message");
        self.pending_message_id = Some(message.id.clone());
        self.state.messages.push(message);
        self.state.streaming_content.clear();
        self.state.streaming_message_id = None;
        self.state.is_streaming = true;
        self.last_error = None;
        Ok(target)
    }

    pub fn apply_chunk(&mut self, target: &StreamTarget, chunk: StreamChunk) -> ChunkOutcome {
        if !self.phase.accepts_chunk(target) {
            tracing::debug!(
                stream = %target,
                chunk = chunk.kind(),
                phase = self.phase.name(),
                "dropping chunk for inactive stream"
            );
            return ChunkOutcome::Stale;
        }

        if matches!(self.phase, StreamPhase::Sending(_)) {
            self.transition(StreamTransition::FirstChunk(target.clone()));
        }

        match chunk {
            StreamChunk::Start { message_id } => {
                match &self.state.streaming_message_id {
                    Some(existing) => {
                        tracing::warn!(
                            stream = %target,
                            existing = %existing,
                            duplicate = %message_id,
                            "ignoring repeated start chunk"
                        );
                    }
                    None => self.state.streaming_message_id = Some(message_id),
                }
                ChunkOutcome::Continue
            }
            StreamChunk::Token { content, .. } => {
                self.state.streaming_content.push_str(&content);
                ChunkOutcome::Continue
            }
            StreamChunk::End { message_id } => {
                tracing::debug!(stream = %target, message_id = %message_id, "stream ended");
                self.transition(StreamTransition::End(target.clone()));
                ChunkOutcome::Ended
            }
            StreamChunk::Error { error } => {
                self.fail(target, error);
                ChunkOutcome::Failed
            }
        }
    }

    /// Moves a live stream to `Failed`, discarding partial text.
    ///
    /// The optimistic user message stays. The phase remains `Failed` until [`Self::settle`].
    /// Returns false when `target` is stale.
    pub fn fail(&mut self, target: &StreamTarget, message: impl Into<String>) -> bool {
        let message = message.into();
        if !self.phase.accepts_chunk(target) {
            tracing::debug!(stream = %target, error = %message, "ignoring failure of inactive stream");
            return false;
        }

        self.transition(StreamTransition::Fail {
            target: target.clone(),
            message: message.clone(),
        });
        tracing::warn!(
            stream = %target,
            discarded_bytes = self.state.streaming_content.len(),
            error = %message,
            "stream failed"
        );
        self.clear_streaming();
        self.pending_message_id = None;
        self.last_error = Some(message);
        true
    }

    /// Replaces the transcript with server truth once the stream ended.
    ///
    /// The optimistic message is dropped either way. A fetch failure leaves the rest of the
    /// transcript stale until the next successful fetch.
    pub fn finish_reconcile(
        &mut self,
        target: &StreamTarget,
        fetched: Result<Vec<Message>, StoreError>,
    ) -> bool {
        if !matches!(&self.phase, StreamPhase::Reconciling(active) if active == target) {
            tracing::debug!(stream = %target, phase = self.phase.name(), "ignoring stale reconciliation");
            return false;
        }

        if let Some(pending) = self.pending_message_id.take() {
            self.state.messages.retain(|message| message.id != pending);
        }
        match fetched {
            Ok(messages) => {
                tracing::debug!(stream = %target, message_count = messages.len(), "reconciled transcript");
                self.state.messages = messages;
            }
            Err(error) => {
                tracing::warn!(
                    stream = %target,
                    error = %error,
                    "reconciliation fetch failed; transcript left stale"
                );
                self.last_error = Some(error.to_string());
            }
        }
        self.clear_streaming();
        true
    }

    /// Returns a reconciled or failed stream to `Idle`.
    pub fn settle(&mut self, target: &StreamTarget) -> bool {
        self.transition(StreamTransition::Settle(target.clone()))
    }

    /// Points the transcript at `session_id`, dropping history and any in-flight stream.
    ///
    /// Returns the view generation a later [`Self::load_history`] must present.
    pub fn begin_switch(&mut self, session_id: SessionId) -> u64 {
        self.abandon_stream();
        self.view_generation = self.view_generation.saturating_add(1);
        self.session_id = Some(session_id);
        self.state.messages.clear();
        self.last_error = None;
        self.view_generation
    }

    /// Installs fetched history if no other switch happened since `generation` was issued.
    pub fn load_history(&mut self, generation: u64, messages: Vec<Message>) -> bool {
        if generation != self.view_generation {
            tracing::debug!(generation, current = self.view_generation, "dropping stale history");
            return false;
        }
        self.state.messages = messages;
        true
    }

    pub fn record_history_error(&mut self, generation: u64, error: impl Into<String>) -> bool {
        if generation != self.view_generation {
            return false;
        }
        self.last_error = Some(error.into());
        true
    }

    /// Forgets the active session entirely.
    pub fn clear_session(&mut self) {
        self.abandon_stream();
        self.view_generation = self.view_generation.saturating_add(1);
        self.session_id = None;
        self.state.messages.clear();
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Logically cancels the in-flight stream; its late chunks will be dropped as stale.
    pub fn abandon_stream(&mut self) -> Option<StreamTarget> {
        let target = self.phase.target().cloned()?;
        if self.phase.blocks_send() {
            tracing::info!(stream = %target, phase = self.phase.name(), "abandoning in-flight stream");
        }
        self.transition(StreamTransition::Abandon(target.clone()));
        self.clear_streaming();
        self.pending_message_id = None;
        Some(target)
    }

    fn clear_streaming(&mut self) {
        self.state.streaming_content.clear();
        self.state.streaming_message_id = None;
        self.state.is_streaming = false;
    }

    fn transition(&mut self, transition: StreamTransition) -> bool {
        let name = transition.name();
        match self.phase.apply(transition) {
            Ok(next) => {
                tracing::trace!(from = self.phase.name(), to = next.name(), transition = name);
                self.phase = next;
                true
            }
            Err(rejection) => {
                tracing::debug!(?rejection, transition = name, "rejected stream transition");
                false
            }
        }
    }
}
