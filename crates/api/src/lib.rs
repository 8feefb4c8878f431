//! REST client for the chat backend. One [`ApiClient`] serves both the session store and the
//! streamed-reply transport.
mod client;
mod error;
mod store;
mod stream;

pub use client::{ApiClient, ApiConfig, TENANT_HEADER};
pub use error::{ApiError, ApiResult};
