use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use snafu::OptionExt;

use super::error::{InjectedSnafu, NotFoundSnafu, StoreResult};
use super::ids::{ChatId, SessionId};
use super::types::{Message, Session, sort_sessions_by_recent};
use super::{BoxFuture, SessionStore};

/// Store operations that can be scripted to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    ListMessages,
    ListSessions,
    CreateSession,
    DeleteSession,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<(ChatId, Session)>,
    messages: HashMap<SessionId, Vec<Message>>,
    next_session_seq: u64,
    pending_failures: HashSet<StoreOperation>,
}

/// In-process [`SessionStore`] with an explicit owner.
///
/// Construct one per app session and share it by `Arc`; it plays the backend's role in tests
/// and offline demos.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session as if the backend already held it.
    pub fn seed_session(&self, chat_id: ChatId, session: Session) {
        let mut state = self.lock();
        state.messages.entry(session.id.clone()).or_default();
        state.sessions.push((chat_id, session));
    }

    /// Appends a server-confirmed message and bumps the session's `updated_at`.
    pub fn insert_message(&self, session_id: &SessionId, message: Message) -> StoreResult<()> {
        let mut state = self.lock();
        let (_, session) = state
            .sessions
            .iter_mut()
            .find(|(_, session)| &session.id == session_id)
            .context(NotFoundSnafu {
                stage: "memory-insert-message",
                entity: "session",
                id: session_id.to_string(),
            })?;
        session.updated_at = session.updated_at.max(message.timestamp);
        state
            .messages
            .entry(session_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    /// Makes the next call of `operation` fail with an injected error.
    pub fn fail_next(&self, operation: StoreOperation) {
        self.lock().pending_failures.insert(operation);
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(state: &mut MemoryState, operation: StoreOperation) -> StoreResult<()> {
        if state.pending_failures.remove(&operation) {
            tracing::debug!(?operation, "memory store returning injected failure");
            return InjectedSnafu {
                stage: "memory-injected-failure",
                operation,
            }
            .fail();
        }
        Ok(())
    }

    fn list_messages_now(&self, session_id: &SessionId) -> StoreResult<Vec<Message>> {
        let mut state = self.lock();
        Self::take_failure(&mut state, StoreOperation::ListMessages)?;

        state
            .messages
            .get(session_id)
            .cloned()
            .context(NotFoundSnafu {
                stage: "memory-list-messages",
                entity: "session",
                id: session_id.to_string(),
            })
    }

    fn list_sessions_now(&self, chat_id: &ChatId) -> StoreResult<Vec<Session>> {
        let mut state = self.lock();
        Self::take_failure(&mut state, StoreOperation::ListSessions)?;

        let mut sessions = state
            .sessions
            .iter()
            .filter(|(owner, _)| owner == chat_id)
            .map(|(_, session)| session.clone())
            .collect::<Vec<_>>();
        sort_sessions_by_recent(&mut sessions);
        Ok(sessions)
    }

    fn create_session_now(&self, chat_id: &ChatId, title: &str) -> StoreResult<Session> {
        let mut state = self.lock();
        Self::take_failure(&mut state, StoreOperation::CreateSession)?;

        state.next_session_seq = state.next_session_seq.saturating_add(1);
        let session = Session::new(
            SessionId::new(format!("session-{}", state.next_session_seq)),
            title,
            Utc::now(),
        );
        state.messages.insert(session.id.clone(), Vec::new());
        state.sessions.push((chat_id.clone(), session.clone()));
        Ok(session)
    }

    fn delete_session_now(&self, session_id: &SessionId) -> StoreResult<()> {
        let mut state = self.lock();
        Self::take_failure(&mut state, StoreOperation::DeleteSession)?;

        let index = state
            .sessions
            .iter()
            .position(|(_, session)| &session.id == session_id)
            .context(NotFoundSnafu {
                stage: "memory-delete-session",
                entity: "session",
                id: session_id.to_string(),
            })?;
        state.sessions.remove(index);
        state.messages.remove(session_id);
        Ok(())
    }
}

impl SessionStore for MemorySessionStore {
    fn list_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, StoreResult<Vec<Message>>> {
        Box::pin(async move { self.list_messages_now(session_id) })
    }

    fn list_sessions<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, StoreResult<Vec<Session>>> {
        Box::pin(async move { self.list_sessions_now(chat_id) })
    }

    fn create_session<'a>(
        &'a self,
        chat_id: &'a ChatId,
        title: &'a str,
    ) -> BoxFuture<'a, StoreResult<Session>> {
        Box::pin(async move { self.create_session_now(chat_id, title) })
    }

    fn delete_session<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { self.delete_session_now(session_id) })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::StoreError;
    use crate::types::Role;

    #[tokio::test]
    async fn sessions_are_scoped_to_chat_and_sorted_by_recency() {
        let store = MemorySessionStore::new();
        let chat = ChatId::new("support-bot");
        let other_chat = ChatId::new("sales-bot");

        let older = store.create_session(&chat, "first").await.unwrap();
        let newer = store.create_session(&chat, "second").await.unwrap();
        store.create_session(&other_chat, "elsewhere").await.unwrap();

        store
            .insert_message(
                &older.id,
                Message::new(
                    "u1",
                    Role::User,
                    "bump",
                    newer.updated_at + Duration::seconds(5),
                ),
            )
            .unwrap();

        let sessions = store.list_sessions(&chat).await.unwrap();
        let ids = sessions.iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec![older.id.as_str(), newer.id.as_str()]);
    }

    #[tokio::test]
    async fn delete_removes_session_and_history() {
        let store = MemorySessionStore::new();
        let chat = ChatId::new("chat");
        let session = store.create_session(&chat, "").await.unwrap();

        store.delete_session(&session.id).await.unwrap();

        assert!(store.list_sessions(&chat).await.unwrap().is_empty());
        assert!(
            store
                .list_messages(&session.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            store
                .delete_session(&session.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemorySessionStore::new();
        let chat = ChatId::new("chat");
        store.fail_next(StoreOperation::ListSessions);

        assert!(matches!(
            store.list_sessions(&chat).await,
            Err(StoreError::Injected {
                operation: StoreOperation::ListSessions,
                ..
            })
        ));
        assert!(store.list_sessions(&chat).await.is_ok());
    }
}
