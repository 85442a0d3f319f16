//! Wire-protocol engine for the Anthropic Messages API.
//!
//! Streaming responses are decoded incrementally (bytes to SSE frames to
//! typed events) and assembled into a [`protocol::Message`] under strict
//! block-lifecycle checks. Legacy Text Completions are served by translating
//! to and from the Messages API, and Message Batches are driven through their
//! submit, poll, results and cancel lifecycle.
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use batch::BatchManager;
pub use client::Client;
pub use config::{load_config, ClientConfig};
pub use error::{ApiError, ApiErrorKind, ProtocolViolation, WireError};
pub use stream::{ContentAccumulator, MessageStream};
pub use transport::{HttpTransport, Transport};
