use futures::StreamExt;
use ragchat_store::{BoxFuture, SessionId};
use ragchat_stream::{
    ChunkDecoder, ChunkSender, OpenSnafu, OutgoingMessage, StatusSnafu, StreamHandle,
    StreamTransport, TransportError, TransportResult, TransportWorker, chunk_channel,
};
use reqwest::Response;
use reqwest::header::ACCEPT;
use snafu::ResultExt;
use tokio::sync::oneshot;

use super::client::ApiClient;

const EVENT_STREAM_MIME: &str = "text/event-stream";

impl ApiClient {
    async fn pump_stream_body(
        session_id: SessionId,
        response: Response,
        chunk_tx: ChunkSender,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut body = response.bytes_stream();
        let mut decoder = ChunkDecoder::new();

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    // Dropping the body aborts the HTTP read so the connection is released.
                    tracing::debug!(session_id = %session_id, "stream body cancelled by reader");
                    return;
                }
                next_bytes = body.next() => {
                    match next_bytes {
                        Some(Ok(bytes)) => {
                            for item in decoder.push(&bytes) {
                                if !chunk_tx.forward(item) {
                                    return;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %source,
                                "stream body read failed"
                            );
                            chunk_tx.send_error(TransportError::Read {
                                stage: "read-stream-body",
                                source: Box::new(source),
                            });
                            return;
                        }
                        None => {
                            for item in decoder.finish() {
                                if !chunk_tx.forward(item) {
                                    return;
                                }
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl StreamTransport for ApiClient {
    fn open_stream<'a>(
        &'a self,
        session_id: &'a SessionId,
        message: OutgoingMessage,
    ) -> BoxFuture<'a, TransportResult<StreamHandle>> {
        Box::pin(async move {
            let url = self.endpoint(&["sessions", session_id.as_str(), "messages", "stream"]);
            let response = self
                .post(url)
                .header(ACCEPT, EVENT_STREAM_MIME)
                .json(&message)
                .send()
                .await
                .boxed()
                .context(OpenSnafu {
                    stage: "open-stream-send",
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(
                    session_id = %session_id,
                    status = status.as_u16(),
                    "stream endpoint rejected message"
                );
                return StatusSnafu {
                    stage: "open-stream-status",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }

            let (chunk_tx, reader, cancel_rx) = chunk_channel();
            let worker: TransportWorker = Box::pin(Self::pump_stream_body(
                session_id.clone(),
                response,
                chunk_tx,
                cancel_rx,
            ));
            Ok(StreamHandle { reader, worker })
        })
    }
}
