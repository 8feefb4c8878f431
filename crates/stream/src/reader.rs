use tokio::sync::{mpsc, oneshot};

use super::chunk::StreamChunk;
use super::error::{TransportError, TransportResult};

type ChunkItem = TransportResult<StreamChunk>;

/// Pull side of one in-flight stream.
///
/// `next` yields chunks in arrival order and `None` once the producer is gone. Dropping the
/// reader signals the producer to stop.
pub struct ChunkReader {
    chunks: mpsc::UnboundedReceiver<ChunkItem>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl ChunkReader {
    pub(crate) fn new(
        chunks: mpsc::UnboundedReceiver<ChunkItem>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            chunks,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn next(&mut self) -> Option<ChunkItem> {
        self.chunks.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Push side handed to the worker that produces chunks.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    chunks: mpsc::UnboundedSender<ChunkItem>,
}

impl ChunkSender {
    pub fn send_error(&self, error: TransportError) -> bool {
        self.chunks.send(Err(error)).is_ok()
    }

    /// Returns false once the reader is gone.
    pub fn forward(&self, item: ChunkItem) -> bool {
        self.chunks.send(item).is_ok()
    }
}

/// Creates the sender, the reader, and the cancellation signal the worker should watch.
pub fn chunk_channel() -> (ChunkSender, ChunkReader, oneshot::Receiver<()>) {
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        ChunkSender { chunks: chunk_tx },
        ChunkReader::new(chunk_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_yields_in_order_then_none() {
        let (sender, mut reader, _cancel_rx) = chunk_channel();
        assert!(sender.forward(Ok(StreamChunk::start("m1"))));
        assert!(sender.forward(Ok(StreamChunk::token("m1", "a"))));
        drop(sender);

        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            StreamChunk::start("m1")
        );
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            StreamChunk::token("m1", "a")
        );
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_reader_signals_cancel_and_closes_sender() {
        let (sender, reader, cancel_rx) = chunk_channel();
        drop(reader);

        assert!(cancel_rx.await.is_ok());
        assert!(!sender.forward(Ok(StreamChunk::end("m1"))));
    }

    #[test]
    fn cancel_fires_only_once() {
        let (_sender, mut reader, _cancel_rx) = chunk_channel();
        assert!(reader.cancel());
        assert!(!reader.cancel());
    }
}
