//! Session and message records plus the store contract the chat core reads them through.
pub mod error;
pub mod ids;
pub mod memory;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::{
    BoxedSource, DecodeSnafu, NotFoundSnafu, RequestSnafu, StatusSnafu, StoreError, StoreResult,
};
pub use ids::{ChatId, MessageId, SessionId, TRANSIENT_MESSAGE_PREFIX};
pub use memory::{MemorySessionStore, StoreOperation};
pub use types::{DEFAULT_SESSION_TITLE, Message, Role, Session, sort_sessions_by_recent};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// CRUD surface for sessions and their message history.
///
/// Implementations are injected into the chat core as `Arc<dyn SessionStore>`; the core never
/// reaches for a global store.
pub trait SessionStore: Send + Sync {
    /// Messages of one session, oldest first.
    fn list_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, StoreResult<Vec<Message>>>;

    /// Sessions of one chat, most recently updated first.
    fn list_sessions<'a>(&'a self, chat_id: &'a ChatId)
    -> BoxFuture<'a, StoreResult<Vec<Session>>>;

    fn create_session<'a>(
        &'a self,
        chat_id: &'a ChatId,
        title: &'a str,
    ) -> BoxFuture<'a, StoreResult<Session>>;

    fn delete_session<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, StoreResult<()>>;
}
