use std::future::Future;
use std::pin::Pin;

use ragchat_store::{BoxFuture, SessionId};

use super::chunk::OutgoingMessage;
use super::error::TransportResult;
use super::reader::ChunkReader;

/// Future that pumps the underlying channel into the reader. The caller must spawn it.
pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct StreamHandle {
    pub reader: ChunkReader,
    pub worker: TransportWorker,
}

/// Opens one streamed assistant reply per posted user message.
///
/// An error from `open_stream` means no chunk was ever produced. Failures after that point
/// arrive through the reader.
pub trait StreamTransport: Send + Sync {
    fn open_stream<'a>(
        &'a self,
        session_id: &'a SessionId,
        message: OutgoingMessage,
    ) -> BoxFuture<'a, TransportResult<StreamHandle>>;
}
