//! Streamed assistant replies: the chunk protocol, a pull-based reader, and the transport
//! contract the chat core consumes.
mod channel;
mod chunk;
mod decoder;
mod error;
mod reader;
mod transport;

pub use channel::{ChannelTransport, ChunkFeeder, OpenedStream};
pub use chunk::{OutgoingMessage, StreamChunk};
pub use decoder::ChunkDecoder;
pub use error::{
    DecodeSnafu, OpenSnafu, ReadSnafu, StatusSnafu, TransportError, TransportResult, Utf8Snafu,
};
pub use reader::{ChunkReader, ChunkSender, chunk_channel};
pub use transport::{StreamHandle, StreamTransport, TransportWorker};
