use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;

use crate::error::{ProtocolViolation, WireError};
use crate::observability::log_message_usage;
use crate::protocol::messages::{Message, StreamEvent};

use super::accumulator::{Applied, ContentAccumulator};

pin_project! {
    /// Typed events of one streamed message, validated as they pass through.
    ///
    /// Every event is applied to a [`ContentAccumulator`] before it is
    /// yielded. The first error (transport, API or protocol) is yielded once
    /// and fuses the stream.
    pub struct MessageStream<S> {
        #[pin]
        events: S,
        accumulator: ContentAccumulator,
        message: Option<Message>,
        started: Instant,
        done: bool,
    }
}

impl<S> MessageStream<S>
where
    S: Stream<Item = Result<StreamEvent, WireError>>,
{
    #[must_use]
    pub fn new(events: S) -> Self {
        Self {
            events,
            accumulator: ContentAccumulator::new(),
            message: None,
            started: Instant::now(),
            done: false,
        }
    }

    /// The assembled message, once `message_stop` has passed.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// Drain the stream and return the assembled message.
    ///
    /// # Errors
    ///
    /// Returns the first error seen on the stream, or
    /// [`ProtocolViolation::MissingMessageStop`] when the stream ends before
    /// `message_stop`.
    pub async fn final_message(self) -> Result<Message, WireError> {
        let mut this = std::pin::pin!(self);
        while let Some(item) = this.next().await {
            item?;
        }
        this.as_mut()
            .project()
            .message
            .take()
            .ok_or_else(|| ProtocolViolation::MissingMessageStop.into())
    }
}

impl<S> Stream for MessageStream<S>
where
    S: Stream<Item = Result<StreamEvent, WireError>>,
{
    type Item = Result<StreamEvent, WireError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.events.poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                *this.done = true;
                if this.message.is_none() {
                    tracing::debug!("message stream ended before message_stop");
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                *this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Ok(event))) => match this.accumulator.apply(&event) {
                Ok(Applied::MessageComplete(message)) => {
                    log_message_usage(&message.model, &message.usage, this.started.elapsed());
                    *this.message = Some(message);
                    Poll::Ready(Some(Ok(event)))
                }
                Ok(Applied::BlockClosed { .. } | Applied::Nothing) => {
                    Poll::Ready(Some(Ok(event)))
                }
                Err(err) => {
                    *this.done = true;
                    Poll::Ready(Some(Err(err)))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ContentBlock, Delta, Role, Usage, UsageDelta};

    fn started() -> StreamEvent {
        StreamEvent::MessageStart {
            message: Message {
                id: "msg_1".to_string(),
                model: "claude".to_string(),
                role: Role::Assistant,
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }

    fn events(items: Vec<Result<StreamEvent, WireError>>) -> MessageStream<impl Stream<Item = Result<StreamEvent, WireError>>> {
        MessageStream::new(futures_util::stream::iter(items))
    }

    #[tokio::test]
    async fn test_final_message_assembles_text() {
        let stream = events(vec![
            Ok(started()),
            Ok(StreamEvent::ContentBlockStart {
                index: 0,
                block: ContentBlock::Text {
                    text: String::new(),
                },
            }),
            Ok(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta {
                    text: "Hi".to_string(),
                },
            }),
            Ok(StreamEvent::ContentBlockStop { index: 0 }),
            Ok(StreamEvent::MessageDelta {
                delta: Delta::StopMetadataDelta {
                    stop_reason: Some("end_turn".to_string()),
                    stop_sequence: None,
                },
                usage: UsageDelta {
                    input_tokens: None,
                    output_tokens: Some(2),
                },
            }),
            Ok(StreamEvent::MessageStop),
        ]);
        let message = stream.final_message().await.unwrap();
        assert_eq!(message.content[0].as_text(), Some("Hi"));
        assert_eq!(message.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn test_stream_without_stop_reports_missing_stop() {
        let stream = events(vec![Ok(started()), Ok(StreamEvent::Ping)]);
        let err = stream.final_message().await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Protocol(ProtocolViolation::MissingMessageStop)
        ));
    }

    #[tokio::test]
    async fn test_stream_fuses_after_violation() {
        let stream = events(vec![
            Ok(started()),
            Ok(StreamEvent::ContentBlockStop { index: 4 }),
            Ok(StreamEvent::MessageStop),
        ]);
        let items: Vec<Result<StreamEvent, WireError>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].as_ref().unwrap_err().is_protocol_violation());
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let stream = events(vec![
            Ok(started()),
            Err(WireError::Transport("reset".to_string())),
            Ok(StreamEvent::MessageStop),
        ]);
        let err = stream.final_message().await.unwrap_err();
        assert!(matches!(err, WireError::Transport(_)));
    }
}
