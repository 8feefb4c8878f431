#![deny(unsafe_code)]

pub mod chat;
pub mod console;
pub mod settings;

pub use chat::{ChatError, ChatSnapshot, StreamPhase, StreamTarget, StreamingChatSession};
