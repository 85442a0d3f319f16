use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::WireError;
use crate::protocol::messages::{ContentBlock, Delta, ErrorBody, Message, StreamEvent, UsageDelta};

use super::sse::frame_stream;

#[derive(Deserialize)]
struct MessageStartWire {
    message: Message,
}

#[derive(Deserialize)]
struct BlockStartWire {
    index: usize,
    content_block: ContentBlock,
}

#[derive(Deserialize)]
struct BlockDeltaWire {
    index: usize,
    delta: Delta,
}

#[derive(Deserialize)]
struct BlockStopWire {
    index: usize,
}

#[derive(Deserialize)]
struct StopMetadataWire {
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    stop_sequence: Option<String>,
}

#[derive(Deserialize)]
struct MessageDeltaWire {
    delta: StopMetadataWire,
    #[serde(default)]
    usage: UsageDelta,
}

#[derive(Deserialize)]
struct ErrorWire {
    error: ErrorBody,
}

/// Typed events decoded from one response body.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, WireError>> + Send>>;

/// The `event:` name and `data:` payload of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame<'a> {
    pub event: &'a str,
    pub data: String,
}

/// Collect the `event:` and `data:` fields of one frame.
///
/// Multiple `data:` lines are joined with `\n`; one space after the colon is
/// stripped; comment lines and other fields are ignored. Returns `None` when
/// either field is missing or the frame is not UTF-8.
#[must_use]
pub fn split_frame(frame: &[u8]) -> Option<RawFrame<'_>> {
    let text = std::str::from_utf8(frame).ok()?;
    let mut event = None;
    let mut data: Option<String> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(buffer) => {
                    buffer.push('\n');
                    buffer.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        } else if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.strip_prefix(' ').unwrap_or(value));
        }
        // `id:`, `retry:` and unknown field names are ignored.
    }

    Some(RawFrame {
        event: event?,
        data: data?,
    })
}

/// Decode one SSE frame into a typed stream event.
///
/// Unknown event types become [`StreamEvent::Unknown`]. Frames without an
/// `event:` or `data:` field, with invalid JSON, or whose payload does not
/// match the schema of its event type yield `None` and are logged.
#[must_use]
pub fn parse_frame(frame: &[u8]) -> Option<StreamEvent> {
    let Some(raw) = split_frame(frame) else {
        tracing::debug!(len = frame.len(), "skipping SSE frame without event/data");
        return None;
    };
    match decode_event(raw.event, &raw.data) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(event_type = raw.event, error = %err, "skipping malformed SSE frame");
            None
        }
    }
}

/// Decode an event payload for a named SSE event.
///
/// # Errors
///
/// Returns the JSON error when `data` is not valid JSON or does not match the
/// shape of `event_type`.
pub fn decode_event(event_type: &str, data: &str) -> Result<StreamEvent, serde_json::Error> {
    let event = match event_type {
        "message_start" => {
            let wire: MessageStartWire = serde_json::from_str(data)?;
            StreamEvent::MessageStart {
                message: wire.message,
            }
        }
        "content_block_start" => {
            let wire: BlockStartWire = serde_json::from_str(data)?;
            StreamEvent::ContentBlockStart {
                index: wire.index,
                block: wire.content_block,
            }
        }
        "content_block_delta" => {
            let wire: BlockDeltaWire = serde_json::from_str(data)?;
            StreamEvent::ContentBlockDelta {
                index: wire.index,
                delta: wire.delta,
            }
        }
        "content_block_stop" => {
            let wire: BlockStopWire = serde_json::from_str(data)?;
            StreamEvent::ContentBlockStop { index: wire.index }
        }
        "message_delta" => {
            let wire: MessageDeltaWire = serde_json::from_str(data)?;
            StreamEvent::MessageDelta {
                delta: Delta::StopMetadataDelta {
                    stop_reason: wire.delta.stop_reason,
                    stop_sequence: wire.delta.stop_sequence,
                },
                usage: wire.usage,
            }
        }
        "message_stop" => {
            serde_json::from_str::<serde::de::IgnoredAny>(data)?;
            StreamEvent::MessageStop
        }
        "ping" => {
            serde_json::from_str::<serde::de::IgnoredAny>(data)?;
            StreamEvent::Ping
        }
        "error" => {
            let wire: ErrorWire = serde_json::from_str(data)?;
            StreamEvent::Error {
                error_type: wire.error.error_type,
                message: wire.error.message,
            }
        }
        other => StreamEvent::Unknown {
            event_type: other.to_string(),
            payload: serde_json::from_str(data)?,
        },
    };
    Ok(event)
}

/// Turn an HTTP body byte stream into a lazy stream of typed events.
///
/// Malformed frames are skipped; a transport error is yielded once and ends
/// the stream.
pub fn event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent, WireError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<WireError> + Send + 'static,
{
    frame_stream(byte_stream).filter_map(|frame| async move {
        match frame {
            Ok(frame) => parse_frame(&frame).map(Ok),
            Err(err) => Some(Err(err)),
        }
    })
}
