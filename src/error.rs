use std::fmt;

/// Crate-wide error type.
///
/// Malformed SSE frames and malformed batch result lines never surface here:
/// they are logged and skipped by the lazy sequences that encounter them.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Batch {batch_id} has no results yet")]
    ResultsNotReady { batch_id: String },
    #[error("Operation cancelled")]
    Cancelled,
}

impl WireError {
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, WireError::Protocol(_))
    }

    #[must_use]
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            WireError::Api(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// A broken stream or batch invariant. Always fatal to the current operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("content block {index} started twice")]
    IndexAlreadyOpen { index: usize },
    #[error("content block {index} is already closed ({event})")]
    IndexAlreadyClosed { index: usize, event: &'static str },
    #[error("{event} references content block {index} which was never started")]
    UnknownIndex { index: usize, event: &'static str },
    #[error("content block {index} is {expected} but received {received}")]
    DeltaKindMismatch {
        index: usize,
        expected: &'static str,
        received: &'static str,
    },
    #[error("{delta} is not allowed in {event}")]
    UnexpectedDelta {
        delta: &'static str,
        event: &'static str,
    },
    #[error("content block {index} still open at message_stop")]
    BlockOpenAtStop { index: usize },
    #[error("tool_use block {index} closed with invalid input JSON: {reason}")]
    InvalidToolInput { index: usize, reason: String },
    #[error("{event} received before message_start")]
    MessageNotStarted { event: &'static str },
    #[error("message_start received twice")]
    MessageAlreadyStarted,
    #[error("{event} received after message_stop")]
    MessageAlreadyStopped { event: &'static str },
    #[error("stream ended before message_stop")]
    MissingMessageStop,
    #[error("duplicate custom_id '{0}' in batch")]
    DuplicateCustomId(String),
    #[error("batch {batch_id} cannot be canceled while {status}")]
    CancelNotInProgress { batch_id: String, status: String },
    #[error("batch {batch_id} went from {from} back to {to}")]
    StatusRegression {
        batch_id: String,
        from: String,
        to: String,
    },
    #[error("batch {batch_id} request counts changed from {expected} to {actual} total")]
    RequestCountChanged {
        batch_id: String,
        expected: u64,
        actual: u64,
    },
    #[error("batch {batch_id} reports request counts whose total overflows")]
    RequestCountOverflow { batch_id: String },
}

/// Fixed hierarchy of server-reported failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RequestTooLarge,
    RateLimit,
    Api,
    Overloaded,
    Generic,
}

impl ApiErrorKind {
    /// Map an HTTP status code to an error kind.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiErrorKind::Authentication,
            403 => ApiErrorKind::Permission,
            404 => ApiErrorKind::NotFound,
            413 => ApiErrorKind::RequestTooLarge,
            429 => ApiErrorKind::RateLimit,
            500 => ApiErrorKind::Api,
            503 => ApiErrorKind::Overloaded,
            _ => ApiErrorKind::Generic,
        }
    }

    /// Map the machine-readable `error.type` string of an `error` stream
    /// event or error body to an error kind.
    #[must_use]
    pub fn from_error_type(error_type: &str) -> Self {
        match error_type {
            "invalid_request_error" => ApiErrorKind::InvalidRequest,
            "authentication_error" => ApiErrorKind::Authentication,
            "permission_error" => ApiErrorKind::Permission,
            "not_found_error" => ApiErrorKind::NotFound,
            "request_too_large" => ApiErrorKind::RequestTooLarge,
            "rate_limit_error" => ApiErrorKind::RateLimit,
            "api_error" => ApiErrorKind::Api,
            "overloaded_error" => ApiErrorKind::Overloaded,
            _ => ApiErrorKind::Generic,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorKind::InvalidRequest => "invalid_request",
            ApiErrorKind::Authentication => "authentication",
            ApiErrorKind::Permission => "permission",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::RequestTooLarge => "request_too_large",
            ApiErrorKind::RateLimit => "rate_limit",
            ApiErrorKind::Api => "api_error",
            ApiErrorKind::Overloaded => "overloaded",
            ApiErrorKind::Generic => "api",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by the server, either as a non-2xx response or as an
/// `error` event inside a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} ({error_type}): {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, absent for in-stream errors.
    pub status: Option<u16>,
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    #[must_use]
    pub fn from_status(
        status: u16,
        error_type: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            kind: ApiErrorKind::from_status(status),
            status: Some(status),
            error_type: error_type.into(),
            message: message.into(),
            request_id,
        }
    }

    #[must_use]
    pub fn from_stream_event(error_type: &str, message: &str) -> Self {
        Self {
            kind: ApiErrorKind::from_error_type(error_type),
            status: None,
            error_type: error_type.to_string(),
            message: message.to_string(),
            request_id: None,
        }
    }
}
