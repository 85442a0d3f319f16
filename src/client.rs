use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::BatchManager;
use crate::config::ClientConfig;
use crate::error::WireError;
use crate::observability::log_message_usage;
use crate::protocol::completion::{Completion, CompletionRequest};
use crate::protocol::messages::{Message, MessageRequest};
use crate::stream::{event_stream, EventStream, MessageStream};
use crate::transport::{decode_json, HttpTransport, Transport};

const MESSAGES_PATH: &str = "/v1/messages";

/// Messages, legacy completions and batches over one shared transport.
#[derive(Debug)]
pub struct Client<T> {
    transport: Arc<T>,
    batches: BatchManager<T>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            batches: self.batches.clone(),
        }
    }
}

impl Client<HttpTransport> {
    /// Build an HTTP-backed client from a validated config.
    ///
    /// # Errors
    ///
    /// Returns the [`HttpTransport::new`] error when the HTTP client cannot
    /// be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, WireError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(transport)
            .with_poll_interval(Duration::from_secs(config.batch.poll_interval_secs)))
    }
}

impl<T: Transport> Client<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    #[must_use]
    pub fn from_shared(transport: Arc<T>) -> Self {
        Self {
            batches: BatchManager::new(Arc::clone(&transport)),
            transport,
        }
    }

    /// Default poll interval handed to the batch manager.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.batches = self.batches.with_poll_interval(poll_interval);
        self
    }

    #[must_use]
    pub fn batches(&self) -> &BatchManager<T> {
        &self.batches
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Send a non-streaming Messages request.
    ///
    /// # Errors
    ///
    /// Returns transport, API and decode errors.
    pub async fn create_message(&self, request: &MessageRequest) -> Result<Message, WireError> {
        let started = Instant::now();
        let mut request = request.clone();
        request.stream = None;
        let body = request_body(&request)?;
        let value = self.transport.post_json(MESSAGES_PATH, &body).await?;
        let message: Message = decode_json(value, "message")?;
        log_message_usage(&message.model, &message.usage, started.elapsed());
        Ok(message)
    }

    /// Send a Messages request with `stream: true` and return its validated
    /// event stream.
    ///
    /// # Errors
    ///
    /// Returns transport and API errors raised before the first byte of the
    /// body; later failures arrive on the stream.
    pub async fn stream_message(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageStream<EventStream>, WireError> {
        let mut request = request.clone();
        request.stream = Some(true);
        let body = request_body(&request)?;
        let bytes = self.transport.post_stream(MESSAGES_PATH, &body).await?;
        let events: EventStream = Box::pin(event_stream(bytes));
        Ok(MessageStream::new(events))
    }

    /// Serve a legacy Text Completions request through the Messages API.
    ///
    /// A request with `stream: true` is streamed and assembled before being
    /// translated back.
    ///
    /// # Errors
    ///
    /// Returns transport, API, decode and (for streamed requests) protocol
    /// errors.
    pub async fn create_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, WireError> {
        let message_request = request.to_message_request();
        let message = if request.stream == Some(true) {
            self.stream_message(&message_request)
                .await?
                .final_message()
                .await?
        } else {
            self.create_message(&message_request).await?
        };
        Ok(Completion::from_message(&message))
    }
}

fn request_body(request: &MessageRequest) -> Result<serde_json::Value, WireError> {
    if request.messages.is_empty() {
        return Err(WireError::InvalidRequest(
            "a message request needs at least one message".to_string(),
        ));
    }
    serde_json::to_value(request)
        .map_err(|err| WireError::InvalidRequest(format!("unserializable request: {err}")))
}
