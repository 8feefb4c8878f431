use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use ragchat_store::{ChatId, Session, SessionId, SessionStore, sort_sessions_by_recent};
use ragchat_stream::{ChunkReader, OutgoingMessage, StreamTransport, TransportWorker};
use snafu::{OptionExt, ResultExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::{ChatResult, NoActiveSessionSnafu, StoreSnafu};
use super::phase::{StreamPhase, StreamTarget};
use super::transcript::{ChatTranscriptState, ChunkOutcome, Transcript};

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounded waits applied while consuming a stream. Expiry fails the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimeouts {
    pub open: Duration,
    pub chunk: Duration,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            open: DEFAULT_OPEN_TIMEOUT,
            chunk: DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

/// Everything a front end needs to render the chat, published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatSnapshot {
    pub active_session: Option<SessionId>,
    pub sessions: Vec<Session>,
    pub transcript: ChatTranscriptState,
    pub phase: StreamPhase,
    pub draft: String,
    pub last_error: Option<String>,
}

struct SessionState {
    transcript: Transcript,
    sessions: Vec<Session>,
    draft: String,
    stream_reader_task: Option<JoinHandle<()>>,
    stream_worker_task: Option<JoinHandle<()>>,
}

impl SessionState {
    fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            active_session: self.transcript.session_id().cloned(),
            sessions: self.sessions.clone(),
            transcript: self.transcript.state().clone(),
            phase: self.transcript.phase().clone(),
            draft: self.draft.clone(),
            last_error: self.transcript.last_error().map(str::to_owned),
        }
    }

    fn abort_stream_tasks(&mut self) {
        if let Some(task) = self.stream_reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stream_worker_task.take() {
            task.abort();
        }
    }
}

struct Inner {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn StreamTransport>,
    chat_id: ChatId,
    timeouts: StreamTimeouts,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<ChatSnapshot>,
}

/// Drives one chat: the session list, the active session's transcript, and the stream that
/// feeds it.
///
/// Cheap to clone; clones share state. Operations never panic on backend failure, every
/// error ends as a returned [`super::ChatError`] or as `last_error` in the next snapshot.
#[derive(Clone)]
pub struct StreamingChatSession {
    inner: Arc<Inner>,
}

impl StreamingChatSession {
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn StreamTransport>,
        chat_id: ChatId,
    ) -> Self {
        let (snapshots, _) = watch::channel(ChatSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                chat_id,
                timeouts: StreamTimeouts::default(),
                state: Mutex::new(SessionState {
                    transcript: Transcript::new(),
                    sessions: Vec::new(),
                    draft: String::new(),
                    stream_reader_task: None,
                    stream_worker_task: None,
                }),
                snapshots,
            }),
        }
    }

    /// Replaces the default bounded waits. Only meaningful before the first send.
    pub fn with_timeouts(self, timeouts: StreamTimeouts) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.timeouts = timeouts;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                tracing::warn!("session already shared; keeping previous stream timeouts");
                Self { inner }
            }
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.inner.chat_id
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn set_draft(&self, draft: impl Into<String>) {
        let mut state = self.lock();
        state.draft = draft.into();
        self.publish(&state);
    }

    /// Posts `content` to the active session and returns once the stream task is spawned.
    ///
    /// Progress is observed through snapshots. Must be called inside a Tokio runtime.
    pub fn send(&self, session_id: &SessionId, content: &str) -> ChatResult<StreamTarget> {
        let target = {
            let mut state = self.lock();
            let target = state
                .transcript
                .begin_send(session_id, content, Utc::now())?;
            self.publish(&state);
            target
        };

        tracing::info!(stream = %target, "sending message");
        let message = OutgoingMessage::user(content.trim());
        let task = tokio::spawn(self.clone().consume_stream(target.clone(), message));

        let mut state = self.lock();
        if state.transcript.is_current(&target) {
            state.stream_reader_task = Some(task);
        }
        Ok(target)
    }

    /// Sends the draft to the active session. The draft is cleared only when the send starts.
    pub fn send_draft(&self) -> ChatResult<StreamTarget> {
        let (session_id, draft) = {
            let state = self.lock();
            let session_id = state
                .transcript
                .session_id()
                .cloned()
                .context(NoActiveSessionSnafu { stage: "send-draft" })?;
            (session_id, state.draft.clone())
        };

        let target = self.send(&session_id, &draft)?;
        let mut state = self.lock();
        state.draft.clear();
        self.publish(&state);
        Ok(target)
    }

    /// Waits until no send is in flight.
    pub async fn wait_until_idle(&self) {
        let mut snapshots = self.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = snapshots.wait_for(|snapshot| snapshot.phase.is_idle()).await;
    }

    /// Re-reads the session list of this chat.
    pub async fn refresh_sessions(&self) -> ChatResult<Vec<Session>> {
        let mut sessions = self
            .inner
            .store
            .list_sessions(&self.inner.chat_id)
            .await
            .context(StoreSnafu {
                stage: "list-sessions",
            })?;
        sort_sessions_by_recent(&mut sessions);

        let mut state = self.lock();
        state.sessions = sessions.clone();
        self.publish(&state);
        Ok(sessions)
    }

    /// Creates a session, refreshes the list, and makes the new session active.
    pub async fn create_session(&self, title: &str) -> ChatResult<Session> {
        let session = self
            .inner
            .store
            .create_session(&self.inner.chat_id, title)
            .await
            .context(StoreSnafu {
                stage: "create-session",
            })?;
        tracing::info!(session_id = %session.id, title = %session.title, "created session");

        if let Err(error) = self.refresh_sessions().await {
            tracing::warn!(error = %error, "session list refresh failed after create");
            let mut state = self.lock();
            if state.sessions.iter().all(|known| known.id != session.id) {
                state.sessions.insert(0, session.clone());
            }
            self.publish(&state);
        }

        self.switch_session(&session.id).await?;
        Ok(session)
    }

    /// Makes `session_id` active and replaces the transcript with its server history.
    ///
    /// Any stream of the previous session is abandoned first. A fetch failure leaves an empty
    /// transcript with `last_error` set.
    pub async fn switch_session(&self, session_id: &SessionId) -> ChatResult<()> {
        let generation = {
            let mut state = self.lock();
            state.abort_stream_tasks();
            let generation = state.transcript.begin_switch(session_id.clone());
            self.publish(&state);
            generation
        };
        tracing::info!(session_id = %session_id, "switching session");

        let fetched = self.inner.store.list_messages(session_id).await;

        let mut state = self.lock();
        match fetched {
            Ok(messages) => {
                state.transcript.load_history(generation, messages);
                self.publish(&state);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "history fetch failed");
                state
                    .transcript
                    .record_history_error(generation, error.to_string());
                self.publish(&state);
                Err(error).context(StoreSnafu {
                    stage: "switch-session",
                })
            }
        }
    }

    /// Deletes a session on the server. Local state changes only after the server agrees.
    pub async fn delete(&self, session_id: &SessionId) -> ChatResult<()> {
        if let Err(error) = self.inner.store.delete_session(session_id).await {
            tracing::warn!(session_id = %session_id, error = %error, "delete failed");
            let mut state = self.lock();
            state.transcript.record_error(error.to_string());
            self.publish(&state);
            return Err(error).context(StoreSnafu {
                stage: "delete-session",
            });
        }
        tracing::info!(session_id = %session_id, "deleted session");

        {
            let mut state = self.lock();
            if state.transcript.session_id() == Some(session_id) {
                state.abort_stream_tasks();
                state.transcript.clear_session();
            }
            self.publish(&state);
        }

        if let Err(error) = self.refresh_sessions().await {
            tracing::warn!(error = %error, "session list refresh failed after delete");
            let mut state = self.lock();
            state.sessions.retain(|session| &session.id != session_id);
            self.publish(&state);
        }
        Ok(())
    }

    async fn consume_stream(self, target: StreamTarget, message: OutgoingMessage) {
        let opened = tokio::time::timeout(
            self.inner.timeouts.open,
            self.inner
                .transport
                .open_stream(&target.session_id, message),
        )
        .await;

        let handle = match opened {
            Ok(Ok(handle)) => handle,
            Ok(Err(error)) => {
                self.fail_stream(&target, error.to_string()).await;
                return;
            }
            Err(_) => {
                self.fail_stream(&target, "timed out opening the stream").await;
                return;
            }
        };

        self.attach_worker(&target, handle.worker);
        self.read_stream(target, handle.reader).await;
    }

    fn attach_worker(&self, target: &StreamTarget, worker: TransportWorker) {
        let task = tokio::spawn(worker);
        let mut state = self.lock();
        if state.transcript.is_current(target) {
            state.stream_worker_task = Some(task);
        } else {
            task.abort();
        }
    }

    async fn read_stream(&self, target: StreamTarget, mut reader: ChunkReader) {
        loop {
            let next = match tokio::time::timeout(self.inner.timeouts.chunk, reader.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.fail_stream(&target, "timed out waiting for the next chunk").await;
                    return;
                }
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(error)) => {
                    self.fail_stream(&target, error.to_string()).await;
                    return;
                }
                None => {
                    self.fail_stream(&target, "stream ended before a terminal chunk").await;
                    return;
                }
            };

            let outcome = {
                let mut state = self.lock();
                let outcome = state.transcript.apply_chunk(&target, chunk);
                if outcome == ChunkOutcome::Failed {
                    state.stream_worker_task = None;
                }
                if outcome != ChunkOutcome::Stale {
                    self.publish(&state);
                }
                outcome
            };

            match outcome {
                ChunkOutcome::Continue => {}
                ChunkOutcome::Ended => {
                    reader.cancel();
                    self.reconcile(&target).await;
                    return;
                }
                ChunkOutcome::Failed => {
                    self.settle_failed(&target).await;
                    return;
                }
                ChunkOutcome::Stale => return,
            }
        }
    }

    async fn reconcile(&self, target: &StreamTarget) {
        let fetched = self.inner.store.list_messages(&target.session_id).await;
        {
            let mut state = self.lock();
            if !state.transcript.finish_reconcile(target, fetched) {
                return;
            }
            self.publish(&state);
        }

        // The exchange bumped the session's `updated_at`; pick up the new order.
        if let Err(error) = self.refresh_sessions().await {
            tracing::warn!(stream = %target, error = %error, "session list refresh failed after stream");
            let mut state = self.lock();
            if state.transcript.is_current(target) {
                state.transcript.record_error(error.to_string());
            }
        }

        let mut state = self.lock();
        if state.transcript.settle(target) {
            state.stream_worker_task = None;
            tracing::info!(stream = %target, "stream reconciled");
        }
        self.publish(&state);
    }

    async fn fail_stream(&self, target: &StreamTarget, message: impl Into<String>) {
        {
            let mut state = self.lock();
            if !state.transcript.fail(target, message) {
                return;
            }
            state.stream_worker_task = None;
            self.publish(&state);
        }
        self.settle_failed(target).await;
    }

    /// Returns a published `Failed` phase to `Idle` once subscribers had a turn to see it.
    async fn settle_failed(&self, target: &StreamTarget) {
        tokio::task::yield_now().await;

        let mut state = self.lock();
        if state.transcript.settle(target) {
            self.publish(&state);
        }
    }

    fn publish(&self, state: &SessionState) {
        self.inner.snapshots.send_replace(state.snapshot());
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
