use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ragchat_store::{BoxFuture, SessionId};
use tokio::sync::{mpsc, oneshot};

use super::chunk::{OutgoingMessage, StreamChunk};
use super::error::{TransportError, TransportResult};
use super::reader::{ChunkSender, chunk_channel};
use super::transport::{StreamHandle, StreamTransport, TransportWorker};

type ChunkItem = TransportResult<StreamChunk>;

/// Test-side handle for one stream opened through a [`ChannelTransport`].
pub struct OpenedStream {
    pub session_id: SessionId,
    pub message: OutgoingMessage,
    pub feeder: ChunkFeeder,
}

/// Feeds chunks into an opened stream. Dropping every feeder ends the stream.
#[derive(Debug, Clone)]
pub struct ChunkFeeder {
    feed: mpsc::UnboundedSender<ChunkItem>,
}

impl ChunkFeeder {
    pub fn send(&self, chunk: StreamChunk) -> bool {
        self.feed.send(Ok(chunk)).is_ok()
    }

    /// Simulates a transport-level failure such as a dropped connection.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.feed
            .send(Err(TransportError::Read {
                stage: "channel-feed",
                source: message.into().into(),
            }))
            .is_ok()
    }
}

enum OpenPlan {
    Script(Vec<StreamChunk>),
    Fail(String),
}

/// In-process [`StreamTransport`] driven by the caller instead of a network.
///
/// Each open either replays a queued script, fails with a queued error, or hands a
/// [`ChunkFeeder`] to whoever awaits [`ChannelTransport::next_opened`].
pub struct ChannelTransport {
    plans: Mutex<VecDeque<OpenPlan>>,
    opened_tx: mpsc::UnboundedSender<OpenedStream>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OpenedStream>>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            plans: Mutex::new(VecDeque::new()),
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
        }
    }

    /// The next open replays `chunks` and then ends the stream.
    pub fn push_script(&self, chunks: Vec<StreamChunk>) {
        self.plans().push_back(OpenPlan::Script(chunks));
    }

    /// The next open fails before yielding any chunk.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.plans().push_back(OpenPlan::Fail(message.into()));
    }

    /// Waits for the next stream opened without a queued plan.
    pub async fn next_opened(&self) -> Option<OpenedStream> {
        self.opened_rx.lock().await.recv().await
    }

    /// Returns an already-opened stream without waiting.
    pub fn try_next_opened(&self) -> Option<OpenedStream> {
        self.opened_rx.try_lock().ok()?.try_recv().ok()
    }

    fn plans(&self) -> MutexGuard<'_, VecDeque<OpenPlan>> {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_forwarder(
        mut feed_rx: mpsc::UnboundedReceiver<ChunkItem>,
        chunk_tx: ChunkSender,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!("channel stream cancelled by reader");
                    break;
                }
                next_item = feed_rx.recv() => {
                    match next_item {
                        Some(item) => {
                            if !chunk_tx.forward(item) {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

impl StreamTransport for ChannelTransport {
    fn open_stream<'a>(
        &'a self,
        session_id: &'a SessionId,
        message: OutgoingMessage,
    ) -> BoxFuture<'a, TransportResult<StreamHandle>> {
        Box::pin(async move {
            let plan = self.plans().pop_front();
            let (feed_tx, feed_rx) = mpsc::unbounded_channel();
            let feeder = ChunkFeeder { feed: feed_tx };

            match plan {
                Some(OpenPlan::Fail(message)) => {
                    return Err(TransportError::Open {
                        stage: "channel-open",
                        source: message.into(),
                    });
                }
                Some(OpenPlan::Script(chunks)) => {
                    for chunk in chunks {
                        feeder.send(chunk);
                    }
                    // Dropping the only feeder ends the stream after the script.
                    drop(feeder);
                }
                None => {
                    let opened = OpenedStream {
                        session_id: session_id.clone(),
                        message,
                        feeder,
                    };
                    if self.opened_tx.send(opened).is_err() {
                        tracing::warn!(session_id = %session_id, "no listener for opened stream");
                    }
                }
            }

            let (chunk_tx, reader, cancel_rx) = chunk_channel();
            let worker: TransportWorker =
                Box::pin(Self::run_forwarder(feed_rx, chunk_tx, cancel_rx));
            Ok(StreamHandle { reader, worker })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_open_replays_then_ends() {
        let transport = ChannelTransport::new();
        transport.push_script(vec![StreamChunk::start("m1"), StreamChunk::end("m1")]);

        let handle = transport
            .open_stream(&SessionId::new("s1"), OutgoingMessage::user("hi"))
            .await
            .unwrap();
        let mut reader = handle.reader;
        tokio::spawn(handle.worker);

        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            StreamChunk::start("m1")
        );
        assert_eq!(reader.next().await.unwrap().unwrap(), StreamChunk::end("m1"));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn live_open_hands_feeder_to_listener() {
        let transport = ChannelTransport::new();
        let handle = transport
            .open_stream(&SessionId::new("s9"), OutgoingMessage::user("ping"))
            .await
            .unwrap();
        let mut reader = handle.reader;
        tokio::spawn(handle.worker);

        let opened = transport.next_opened().await.unwrap();
        assert_eq!(opened.session_id.as_str(), "s9");
        assert_eq!(opened.message.content, "ping");

        opened.feeder.fail("connection reset");
        assert!(matches!(
            reader.next().await,
            Some(Err(TransportError::Read { .. }))
        ));
    }

    #[tokio::test]
    async fn queued_failure_rejects_open() {
        let transport = ChannelTransport::new();
        transport.fail_next_open("unauthorized");

        let result = transport
            .open_stream(&SessionId::new("s1"), OutgoingMessage::user("hi"))
            .await;
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }
}
