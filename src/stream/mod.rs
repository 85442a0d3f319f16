//! Streaming side of the Messages API: byte chunks to frames, frames to typed
//! events, events to an assembled [`Message`](crate::protocol::Message).
pub mod accumulator;
pub mod event;
pub mod message_stream;
pub mod sse;

pub use accumulator::{Applied, ContentAccumulator};
pub use event::{decode_event, event_stream, parse_frame, split_frame, EventStream, RawFrame};
pub use message_stream::MessageStream;
pub use sse::{frame_stream, FrameDecoder};
